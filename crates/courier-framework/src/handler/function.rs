//! Function traits implemented by handler functions of every supported arity.

use std::future::{Future, ready};
use std::sync::Arc;

use courier_core::BoxFuture;

use super::params::{FromScope, ParameterScope};
use super::{IntoHandlingResult, guarded};
use crate::error::HandlerResult;

/// An async handler: `Fn(Arc<H>, In, T1, .., Tn) -> impl Future`.
///
/// `In` is the message, a `Vec` of messages, or a [`Batch`](super::Batch).
/// The extra arguments are extracted from the invocation's
/// [`ParameterScope`]; a failed extraction fails the invocation without
/// calling the function.
pub trait HandlerFn<H, In, Args>: Clone + Send + Sync + 'static {
    /// Invokes the handler. Panics are reported as errors.
    fn call(&self, handler: Arc<H>, input: In, scope: &ParameterScope)
    -> BoxFuture<'static, HandlerResult>;
}

/// A synchronous handler: `Fn(&H, In, T1, .., Tn) -> R`.
///
/// The function runs inside the returned future.
pub trait SyncHandlerFn<H, In, Args>: Clone + Send + Sync + 'static {
    /// Invokes the handler. Panics are reported as errors.
    fn call(&self, handler: Arc<H>, input: In, scope: &ParameterScope)
    -> BoxFuture<'static, HandlerResult>;
}

macro_rules! impl_handler_fn {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, H, In, $($ty,)*> HandlerFn<H, In, ($($ty,)*)> for F
        where
            F: Fn(Arc<H>, In, $($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: IntoHandlingResult,
            H: Send + Sync + 'static,
            In: Send + 'static,
            $($ty: FromScope,)*
        {
            fn call(
                &self,
                handler: Arc<H>,
                input: In,
                scope: &ParameterScope,
            ) -> BoxFuture<'static, HandlerResult> {
                $(
                    let $ty = match $ty::from_scope(scope) {
                        Ok(value) => value,
                        Err(err) => return Box::pin(ready(Err(err))),
                    };
                )*
                let future = (self)(handler, input, $($ty,)*);
                guarded(async move { future.await.into_handling_result() })
            }
        }

        #[allow(non_snake_case, unused_variables)]
        impl<F, R, H, In, $($ty,)*> SyncHandlerFn<H, In, ($($ty,)*)> for F
        where
            F: Fn(&H, In, $($ty,)*) -> R + Clone + Send + Sync + 'static,
            R: IntoHandlingResult,
            H: Send + Sync + 'static,
            In: Send + 'static,
            $($ty: FromScope,)*
        {
            fn call(
                &self,
                handler: Arc<H>,
                input: In,
                scope: &ParameterScope,
            ) -> BoxFuture<'static, HandlerResult> {
                $(
                    let $ty = match $ty::from_scope(scope) {
                        Ok(value) => value,
                        Err(err) => return Box::pin(ready(Err(err))),
                    };
                )*
                let function = self.clone();
                guarded(async move { function(&*handler, input, $($ty,)*).into_handling_result() })
            }
        }
    };
}

impl_handler_fn!();
impl_handler_fn!(T1);
impl_handler_fn!(T1, T2);
impl_handler_fn!(T1, T2, T3);
impl_handler_fn!(T1, T2, T3, T4);
impl_handler_fn!(T1, T2, T3, T4, T5);
impl_handler_fn!(T1, T2, T3, T4, T5, T6);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{Param, ParameterProvider, ParameterSet};
    use courier_core::CommandHandlingResult;

    struct Greeter;

    impl Greeter {
        async fn greet(
            self: Arc<Self>,
            name: String,
            suffix: Param<&'static str>,
        ) -> Result<(), String> {
            if format!("{name}{}", *suffix) == "courier!" {
                Ok(())
            } else {
                Err(format!("unexpected greeting for {name}"))
            }
        }

        async fn retry(self: Arc<Self>, _name: String) -> CommandHandlingResult {
            CommandHandlingResult::retry_after(250)
        }

        fn check(&self, name: String) -> Result<(), String> {
            if name.is_empty() {
                Err("empty name".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn call_async<Args, F: HandlerFn<Greeter, String, Args>>(
        f: F,
        scope: &ParameterScope,
    ) -> BoxFuture<'static, HandlerResult> {
        f.call(Arc::new(Greeter), "courier".to_string(), scope)
    }

    #[tokio::test]
    async fn async_handlers_receive_parameters() {
        let set = ParameterSet::new(vec![ParameterProvider::value("!")]);

        let result = call_async(Greeter::greet, &set.open_scope()).await;
        assert!(result.is_ok());

        let result = call_async(Greeter::retry, &ParameterScope::empty()).await;
        assert_eq!(result.ok(), Some(CommandHandlingResult::retry_after(250)));
    }

    #[tokio::test]
    async fn missing_parameters_fail_without_calling() {
        let result = call_async(Greeter::greet, &ParameterScope::empty()).await;

        assert!(matches!(result, Err(HandlerError::MissingParameter(_))));
    }

    #[tokio::test]
    async fn sync_handlers() {
        let scope = ParameterScope::empty();
        let ok = SyncHandlerFn::call(&Greeter::check, Arc::new(Greeter), "a".to_string(), &scope).await;
        let failed =
            SyncHandlerFn::call(&Greeter::check, Arc::new(Greeter), String::new(), &scope).await;

        assert!(ok.is_ok());
        assert!(matches!(failed, Err(HandlerError::Failed(err)) if err.to_string() == "empty name"));
    }
}
