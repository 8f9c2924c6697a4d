/// Logs the error of a `Result<(), E>` with all its sources at DEBUG level.
#[macro_export]
macro_rules! unwrap_or_debug {
    (
        $result:expr,
        $($arg:tt)*
    ) => {
        match $result {
            Ok(()) => {}
            Err(e) => {
                let error: &(dyn ::std::error::Error + 'static) = &e;

                ::tracing::debug!($($arg)*, $crate::err_with_src(error))
            }
        }
    };
}
