/// Logs the error (with all its sources) at `warn` level if `$result` is an `Err`.
#[macro_export]
macro_rules! unwrap_or_warn {
    (
        $result:expr,
        $($arg:tt)*
    ) => {
        match $result {
            Ok(()) => {}
            Err(e) => {
                let error: &(dyn ::std::error::Error + 'static) = &e;

                ::tracing::warn!($($arg)*, $crate::err_with_src(error))
            }
        }
    };
}
