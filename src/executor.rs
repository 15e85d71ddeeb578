//! # Async Operation Executor
//!
//! Wraps an asynchronous action with a loading flag and notification side
//! effects. Failures never propagate past [`AsyncOperation::execute`]: they are
//! reported through the [`Notifier`] and surface to the caller as `None`.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::notify::{Notifier, Severity};

/// Message shown when neither the caller nor the error supplies one
pub const FALLBACK_ERROR_MESSAGE: &str = "Something went wrong";

/// Declarative notification messages attached to an operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMessages {
    /// Emitted after a successful call; no notification when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_message: Option<String>,
    /// Severity of the success notification (default: success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_severity: Option<Severity>,
    /// Replaces the error's own message in the failure notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl OperationMessages {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_success_severity(mut self, severity: Severity) -> Self {
        self.success_severity = Some(severity);
        self
    }

    /// Resolve the user-facing failure message
    pub fn error_text(&self, err: &anyhow::Error) -> String {
        if let Some(message) = &self.error_message {
            return message.clone();
        }
        let own = err.to_string();
        if own.trim().is_empty() {
            FALLBACK_ERROR_MESSAGE.to_string()
        } else {
            own
        }
    }
}

type SuccessHook<'a, T> = Box<dyn FnOnce(&T) + Send + 'a>;
type ErrorHook<'a> = Box<dyn FnOnce(&anyhow::Error) + Send + 'a>;
type FinallyHook<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Per-call callbacks for [`AsyncOperation::execute_with`]
pub struct ExecuteHooks<'a, T> {
    on_success: Option<SuccessHook<'a, T>>,
    on_error: Option<ErrorHook<'a>>,
    on_finally: Option<FinallyHook<'a>>,
}

impl<T> Default for ExecuteHooks<'_, T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_finally: None,
        }
    }
}

impl<'a, T> ExecuteHooks<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, hook: impl FnOnce(&T) + Send + 'a) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl FnOnce(&anyhow::Error) + Send + 'a) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn on_finally(mut self, hook: impl FnOnce() + Send + 'a) -> Self {
        self.on_finally = Some(Box::new(hook));
        self
    }
}

/// A named asynchronous operation with its own loading flag
pub struct AsyncOperation {
    name: String,
    notifier: Arc<dyn Notifier>,
    messages: OperationMessages,
    loading: watch::Sender<bool>,
}

impl AsyncOperation {
    pub fn new(name: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            name: name.into(),
            notifier,
            messages: OperationMessages::default(),
            loading: watch::Sender::new(false),
        }
    }

    pub fn with_messages(mut self, messages: OperationMessages) -> Self {
        self.messages = messages;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &OperationMessages {
        &self.messages
    }

    /// Whether a call is currently in flight (latest transition wins)
    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Observe loading transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    /// Run `action`, returning its value or `None` if it failed.
    pub async fn execute<T, F, Fut>(&self, action: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_with(action, ExecuteHooks::default()).await
    }

    /// Run `action` with per-call hooks.
    ///
    /// The loading flag is cleared before `on_finally` runs, and also when the
    /// action panics or the returned future is dropped mid-flight.
    pub async fn execute_with<'a, T, F, Fut>(&self, action: F, hooks: ExecuteHooks<'a, T>) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let ExecuteHooks {
            on_success,
            on_error,
            on_finally,
        } = hooks;

        self.loading.send_replace(true);
        let loading = scopeguard::guard(&self.loading, |loading| {
            loading.send_replace(false);
        });
        debug!(operation = %self.name, "Operation started");

        let result = match action().await {
            Ok(value) => {
                if let Some(hook) = on_success {
                    hook(&value);
                }
                if let Some(message) = &self.messages.success_message {
                    let severity = self.messages.success_severity.unwrap_or(Severity::Success);
                    self.notifier.notify(message, severity);
                }
                debug!(operation = %self.name, "Operation succeeded");
                Some(value)
            }
            Err(err) => {
                if let Some(hook) = on_error {
                    hook(&err);
                }
                let message = self.messages.error_text(&err);
                warn!(operation = %self.name, error = ?err, "Operation failed");
                counter!("crud_context_operation_failures_total", "operation" => self.name.clone())
                    .increment(1);
                self.notifier.notify(&message, Severity::Error);
                None
            }
        };

        drop(loading);
        if let Some(hook) = on_finally {
            hook();
        }
        result
    }
}

impl std::fmt::Debug for AsyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("name", &self.name)
            .field("messages", &self.messages)
            .field("is_loading", &self.is_loading())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelNotifier, Notification};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn operation() -> (Arc<AsyncOperation>, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (notifier, receiver) = ChannelNotifier::new();
        (
            Arc::new(AsyncOperation::new("test", Arc::new(notifier))),
            receiver,
        )
    }

    #[tokio::test]
    async fn loading_is_true_only_while_in_flight() {
        let (op, _rx) = operation();
        let (release, wait) = oneshot::channel::<()>();

        assert!(!op.is_loading());
        let task = {
            let op = op.clone();
            tokio::spawn(async move {
                op.execute(|| async move {
                    wait.await?;
                    Ok::<_, anyhow::Error>(7)
                })
                .await
            })
        };

        let mut loading = op.subscribe();
        loading.wait_for(|value| *value).await.unwrap();
        assert!(op.is_loading());

        release.send(()).unwrap();
        assert_eq!(task.await.unwrap(), Some(7));
        assert!(!op.is_loading());
    }

    #[tokio::test]
    async fn failure_is_notified_not_propagated() {
        let (op, mut rx) = operation();
        let result: Option<u32> = op
            .execute(|| async { Err(anyhow::anyhow!("conflict")) })
            .await;

        assert_eq!(result, None);
        assert!(!op.is_loading());
        let note = rx.try_recv().unwrap();
        assert_eq!(note.message, "conflict");
        assert_eq!(note.severity, Severity::Error);
        assert!(rx.try_recv().is_err(), "exactly one notification");
    }

    #[tokio::test]
    async fn declared_error_message_takes_priority() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let op = AsyncOperation::new("save", Arc::new(notifier))
            .with_messages(OperationMessages::default().with_error("Could not save"));

        let _: Option<()> = op.execute(|| async { Err(anyhow::anyhow!("db down")) }).await;
        assert_eq!(rx.try_recv().unwrap().message, "Could not save");
    }

    #[tokio::test]
    async fn empty_error_message_falls_back() {
        let (op, mut rx) = operation();
        let _: Option<()> = op.execute(|| async { Err(anyhow::anyhow!("")) }).await;
        assert_eq!(rx.try_recv().unwrap().message, FALLBACK_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn success_message_uses_declared_severity() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let op = AsyncOperation::new("create", Arc::new(notifier)).with_messages(
            OperationMessages::success("Created").with_success_severity(Severity::Info),
        );

        assert_eq!(op.execute(|| async { Ok("x") }).await, Some("x"));
        let note = rx.try_recv().unwrap();
        assert_eq!(note.message, "Created");
        assert_eq!(note.severity, Severity::Info);
    }

    #[tokio::test]
    async fn silent_success_without_message() {
        let (op, mut rx) = operation();
        assert_eq!(op.execute(|| async { Ok(1) }).await, Some(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hooks_run_in_order() {
        let (op, _rx) = operation();
        let calls = Mutex::new(Vec::new());

        let _ = op
            .execute_with(
                || async { Ok(5) },
                ExecuteHooks::new()
                    .on_success(|value: &i32| calls.lock().unwrap().push(format!("success:{value}")))
                    .on_error(|_| calls.lock().unwrap().push("error".into()))
                    .on_finally(|| calls.lock().unwrap().push("finally".into())),
            )
            .await;
        let _: Option<i32> = op
            .execute_with(
                || async { Err(anyhow::anyhow!("boom")) },
                ExecuteHooks::new()
                    .on_error(|err| calls.lock().unwrap().push(format!("error:{err}")))
                    .on_finally(|| calls.lock().unwrap().push("finally".into())),
            )
            .await;

        assert_eq!(
            calls.into_inner().unwrap(),
            vec!["success:5", "finally", "error:boom", "finally"]
        );
    }

    #[tokio::test]
    async fn finally_hook_sees_cleared_loading_flag() {
        let (op, _rx) = operation();
        let seen = Mutex::new(None);
        let _ = op
            .execute_with(
                || async { Ok(()) },
                ExecuteHooks::new().on_finally(|| *seen.lock().unwrap() = Some(op.is_loading())),
            )
            .await;
        assert_eq!(seen.into_inner().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn panicking_action_clears_loading_flag() {
        let (op, _rx) = operation();
        let task = {
            let op = op.clone();
            tokio::spawn(async move {
                op.execute(|| -> std::future::Ready<anyhow::Result<()>> {
                    panic!("action blew up")
                })
                .await
            })
        };

        assert!(task.await.is_err());
        assert!(!op.is_loading());
    }

    #[tokio::test]
    async fn dropped_call_clears_loading_flag() {
        let (op, _rx) = operation();
        let pending = op.execute(|| async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;

        assert!(timed_out.is_err());
        assert!(!op.is_loading());
    }
}
