//! Operation boundary: no panic escapes a public operation.

use futures_util::FutureExt;
use safescale_iaas::{Error, Result};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `operation`, turning a panic into an infrastructure error.
pub async fn guarded<T>(name: &str, operation: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!("{} panicked: {}", name, message);
            Err(Error::infra(format!("{} failed unexpectedly: {}", name, message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_iaas::ErrorKind;

    #[tokio::test]
    async fn test_panic_becomes_infra_error() {
        let err = guarded("host create", async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infra);
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_result_passes_through() {
        let value = guarded("noop", async { Ok(3) }).await.unwrap();
        assert_eq!(value, 3);

        let err = guarded::<()>("noop", async { Err(Error::logic("no")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
    }
}
