/*!
 * Action dispatch.
 *
 * [`action`] resolves an action by name on a device's model and invokes it
 * with raw JSON arguments. It holds no state and takes no locks.
 */
use bytes::Bytes;
use tracing::{debug, Instrument};

use tmios_core::logging::operation_span;

use crate::context::Context;
use crate::device::Device;
use crate::error::{DeviceError, Result};

/// Invoke the action `name` of `device` with JSON `args`
///
/// Returns [`DeviceError::InvalidAction`] without decoding anything when the
/// device model has no such action.
pub async fn action(ctx: &Context, device: &dyn Device, name: &str, args: &[u8]) -> Result<Bytes> {
    let model = device.meta();
    let Some(action) = model.get_action(name) else {
        debug!(model = model.model(), action = name, "Unknown action");
        return Err(DeviceError::InvalidAction(name.to_string()));
    };

    debug!(
        model = model.model(),
        action = name,
        request_id = %ctx.request_id(),
        "Dispatching action"
    );
    action
        .invoke(ctx, device, args)
        .instrument(operation_span(name, model.model()))
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::base::BaseDevice;
    use crate::device::{DeviceExt, Pom};
    use crate::error::ErrorKind;
    use crate::model::DeviceModel;
    use crate::storage::MemoryStorage;

    crate::schema! {
        struct EchoArgs {
            text: String => { validate: "required,max=16" },
            times: u8 => { validate: "gte=1,lte=4" },
        }
    }

    crate::schema! {
        struct EchoRets {
            echoed: String,
        }
    }

    crate::schema! {
        struct Paper {
            size: String => { validate: "oneof=a4 a5" },
        }
    }

    crate::schema! {
        struct PrintArgs {
            copies: u8 => { validate: "gte=1" },
            paper: Paper,
        }
    }

    fn echo_device(calls: Arc<AtomicUsize>) -> BaseDevice {
        let printed = calls.clone();
        let model = DeviceModel::builder("echo-1")
            .action("print", "Print copies", move |_ctx, _device, args: &PrintArgs, rets: &mut EchoRets| {
                printed.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    rets.echoed = format!("{}x{}", args.copies, args.paper.size);
                    Ok(())
                })
            })
            .action("echo", "Repeat text", move |_ctx, _device, args: &EchoArgs, rets: &mut EchoRets| {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if args.text == "jam" {
                        anyhow::bail!("printer jammed");
                    }
                    rets.echoed = args.text.repeat(usize::from(args.times));
                    Ok(())
                })
            })
            .build()
            .unwrap();

        BaseDevice::new(
            Arc::new(model),
            Pom::default(),
            b"{}",
            Arc::new(MemoryStorage::new()),
        )
        .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_dispatch_invokes_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let device = echo_device(calls.clone());
        let ctx = Context::background();

        let rets = action(&ctx, &device, "echo", br#"{"text": "ab", "times": 3}"#)
            .await
            .unwrap();
        let rets: serde_json::Value = serde_json::from_slice(&rets).unwrap();
        assert_eq!(rets, serde_json::json!({"echoed": "ababab"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_action() {
        let calls = Arc::new(AtomicUsize::new(0));
        let device = echo_device(calls.clone());

        // Arguments are never looked at
        let err = action(&Context::background(), &device, "missing-action", b"{garbage")
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidAction(ref name) if name == "missing-action"));
        assert_eq!(err.kind(), ErrorKind::InvalidAction);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decode_and_validation_stop_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let device = echo_device(calls.clone());
        let ctx = Context::background();

        let err = action(&ctx, &device, "echo", br#"{"text": 5}"#).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);

        let err = action(&ctx, &device, "echo", br#"{"text": "", "times": 9}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("text"));
        assert!(err.to_string().contains("times"));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nested_rules_stop_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let device = echo_device(calls.clone());
        let ctx = Context::background();

        let rets = action(&ctx, &device, "print", br#"{"copies": 2, "paper": {"size": "a4"}}"#)
            .await
            .unwrap();
        assert_eq!(&rets[..], br#"{"echoed":"2xa4"}"#);

        let err = action(&ctx, &device, "print", br#"{"copies": 2, "paper": {"size": "letter"}}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("paper.size must be one of [a4 a5]"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_passes_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let device = echo_device(calls.clone());

        let err = device
            .action(&Context::background(), "echo", br#"{"text": "jam", "times": 1}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handler);
        assert_eq!(err.to_string(), "printer jammed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_through_trait_object() {
        let calls = Arc::new(AtomicUsize::new(0));
        let device: Arc<dyn Device> = Arc::new(echo_device(calls.clone()));

        let rets = action(&Context::background(), &*device, "echo", br#"{"text": "x", "times": 2}"#)
            .await
            .unwrap();
        assert_eq!(&rets[..], br#"{"echoed":"xx"}"#);
        assert!(device.downcast_device::<BaseDevice>().is_some());
    }
}
