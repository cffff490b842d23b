/*!
 * Action descriptors.
 *
 * An [`ActionDescriptor`] binds an action name to a typed handler
 * `(ctx, device, &args, &mut rets)`. The argument and result structs are
 * described once, when the descriptor is built; afterwards
 * [`ActionDescriptor::invoke`] turns raw JSON into a fresh `Args`, validates
 * it, runs the handler on a default `Rets` and encodes the result.
 */
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::context::Context;
use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::schema::{PropertySet, Schema, SchemaError};

trait ErasedHandler: Send + Sync {
    fn invoke<'a>(
        &'a self,
        ctx: &'a Context,
        device: &'a dyn Device,
        schema: &'a PropertySet,
        raw: &'a [u8],
    ) -> BoxFuture<'a, Result<Bytes>>;
}

struct TypedHandler<A, R, F> {
    handler: F,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, F> ErasedHandler for TypedHandler<A, R, F>
where
    A: Schema,
    R: Schema,
    F: for<'a> Fn(&'a Context, &'a dyn Device, &'a A, &'a mut R) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync
        + 'static,
{
    fn invoke<'a>(
        &'a self,
        ctx: &'a Context,
        device: &'a dyn Device,
        schema: &'a PropertySet,
        raw: &'a [u8],
    ) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            let args: A = schema.decode(raw)?;
            let mut rets = R::default();
            (self.handler)(ctx, device, &args, &mut rets)
                .await
                .map_err(DeviceError::Handler)?;
            let encoded = serde_json::to_vec(&rets).map_err(SchemaError::Encode)?;
            Ok(Bytes::from(encoded))
        })
    }
}

/// A named, callable action of a device model
#[derive(Clone, Serialize)]
pub struct ActionDescriptor {
    name: String,
    desc: String,
    args: PropertySet,
    rets: PropertySet,
    #[serde(skip)]
    handler: Arc<dyn ErasedHandler>,
}

impl ActionDescriptor {
    /// Build a descriptor for a typed handler
    ///
    /// Handlers return a boxed future borrowing their inputs:
    ///
    /// ```
    /// use tmios_devices::{schema, ActionDescriptor};
    ///
    /// schema! { pub struct Args { pub target: f64 => { validate: "gte=5" } } }
    /// schema! { pub struct Rets { pub ok: bool } }
    ///
    /// let action = ActionDescriptor::new("set-target", "Set the target", |_ctx, _dev, args: &Args, rets: &mut Rets| {
    ///     Box::pin(async move {
    ///         rets.ok = args.target < 30.0;
    ///         Ok(())
    ///     })
    /// })
    /// .unwrap();
    /// assert_eq!(action.name(), "set-target");
    /// ```
    ///
    /// Fails with a configuration error when `A` or `R` cannot be described.
    pub fn new<A, R, F>(name: &str, desc: &str, handler: F) -> Result<Self>
    where
        A: Schema,
        R: Schema,
        F: for<'a> Fn(&'a Context, &'a dyn Device, &'a A, &'a mut R) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        if name.trim().is_empty() {
            return Err(DeviceError::configuration("action name must not be empty"));
        }

        let args = PropertySet::of::<A>().map_err(|e| action_config(name, "args", e))?;
        let rets = PropertySet::of::<R>().map_err(|e| action_config(name, "rets", e))?;

        Ok(Self {
            name: name.to_string(),
            desc: desc.to_string(),
            args,
            rets,
            handler: Arc::new(TypedHandler {
                handler,
                _marker: PhantomData,
            }),
        })
    }

    /// The action name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The description
    pub fn desc(&self) -> &str {
        &self.desc
    }

    /// The argument schema
    pub fn args(&self) -> &PropertySet {
        &self.args
    }

    /// The result schema
    pub fn rets(&self) -> &PropertySet {
        &self.rets
    }

    /// Decode `raw` into fresh arguments, validate them, run the handler and
    /// encode its results
    ///
    /// Decode and validation failures are returned before the handler runs.
    /// A handler error is returned unchanged as [`DeviceError::Handler`].
    pub async fn invoke(&self, ctx: &Context, device: &dyn Device, raw: &[u8]) -> Result<Bytes> {
        self.handler.invoke(ctx, device, &self.args, raw).await
    }
}

fn action_config(action: &str, part: &str, err: SchemaError) -> DeviceError {
    DeviceError::Configuration(format!("action '{}' {}: {}", action, part, err))
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("desc", &self.desc)
            .field("args", &self.args)
            .field("rets", &self.rets)
            .finish_non_exhaustive()
    }
}

/// Build a descriptor for a typed handler; see [`ActionDescriptor::new`]
pub fn build_action_descriptor<A, R, F>(name: &str, handler: F, desc: &str) -> Result<ActionDescriptor>
where
    A: Schema,
    R: Schema,
    F: for<'a> Fn(&'a Context, &'a dyn Device, &'a A, &'a mut R) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync
        + 'static,
{
    ActionDescriptor::new(name, desc, handler)
}
