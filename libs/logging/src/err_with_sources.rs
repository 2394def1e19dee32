use std::error::Error;
use std::fmt;

/// Renders an error followed by its chain of sources, separated by `: `.
///
/// Use it wherever an error is logged, `Display` of most errors omits the sources.
pub fn err_with_src<'a>(e: &'a (dyn Error + 'static)) -> ErrorWithSources<'a> {
    ErrorWithSources { root: e }
}

#[derive(Clone, Copy)]
pub struct ErrorWithSources<'a> {
    root: &'a (dyn Error + 'static),
}

impl fmt::Display for ErrorWithSources<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;

        for source in anyhow::Chain::new(self.root).skip(1) {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}
