//! Front door for submitting commands.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use event_store::EventLog;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::aggregate::CommandPayload;
use crate::command::{Command, CommandResult};
use crate::error::RuntimeError;
use crate::runtime::AggregateRuntime;

/// Submits commands to a shared [`AggregateRuntime`].
///
/// Cheap to clone; every clone feeds the same runtime.
pub struct CommandGateway<L> {
    runtime: Arc<AggregateRuntime<L>>,
}

impl<L> Clone for CommandGateway<L> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<L: EventLog + 'static> CommandGateway<L> {
    pub fn new(runtime: Arc<AggregateRuntime<L>>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<AggregateRuntime<L>> {
        &self.runtime
    }

    /// Handles the command and waits for its result.
    pub async fn submit(&self, command: Command) -> CommandResult {
        self.runtime.handle(command).await
    }

    /// Starts handling the command in the background.
    ///
    /// The returned future resolves to the result. Dropping it does not
    /// abort the command; it still runs to completion.
    pub fn submit_async(&self, command: Command) -> CommandFuture {
        let runtime = Arc::clone(&self.runtime);
        CommandFuture {
            handle: tokio::spawn(async move { runtime.handle(command).await }),
        }
    }

    /// Submits a typed command and decodes the handler's result.
    pub async fn send<C, R>(&self, command: &C) -> Result<R, RuntimeError>
    where
        C: CommandPayload,
        R: DeserializeOwned,
    {
        let value = self.submit(Command::from_payload(command)?).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Result of a command submitted with [`CommandGateway::submit_async`].
#[derive(Debug)]
pub struct CommandFuture {
    handle: JoinHandle<CommandResult>,
}

impl CommandFuture {
    /// Returns true once the command has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for CommandFuture {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(RuntimeError::Dispatch(format!("command task failed: {e}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::Tag;
    use event_store::{EventCriteria, InMemoryEventLog};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::aggregate::DomainEvent;
    use crate::decision::Decision;
    use crate::definition::AggregateDefinition;
    use crate::error::ValidationError;
    use crate::projector::Projector;
    use crate::registry::CommandRegistry;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Counted {
        counter: String,
    }

    impl DomainEvent for Counted {
        const EVENT_TYPE: &'static str = "Counted";

        fn tags(&self) -> Vec<Tag> {
            vec![Tag::new("Counter", &self.counter)]
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Count {
        counter: String,
    }

    impl CommandPayload for Count {
        const COMMAND_TYPE: &'static str = "Count";
        type Target = String;

        fn target(&self) -> String {
            self.counter.clone()
        }
    }

    fn gateway() -> CommandGateway<InMemoryEventLog> {
        let counters = AggregateDefinition::new(
            "Counter",
            0u32,
            |counter: &String| EventCriteria::having_tag(Tag::new("Counter", counter.as_str())),
            Projector::new().on(|n, _: Counted| n + 1),
        );
        let mut registry = CommandRegistry::new();
        registry
            .register(&counters, |cmd: Count, n: &u32| {
                Ok::<_, ValidationError>(Decision::new(n + 1).emit(Counted {
                    counter: cmd.counter,
                }))
            })
            .unwrap();
        CommandGateway::new(Arc::new(AggregateRuntime::new(
            InMemoryEventLog::new(),
            registry,
        )))
    }

    fn count(counter: &str) -> Command {
        Command::from_payload(&Count {
            counter: counter.into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn send_decodes_typed_result() {
        let gateway = gateway();
        let first: u32 = gateway.send(&Count { counter: "c".into() }).await.unwrap();
        let second: u32 = gateway.send(&Count { counter: "c".into() }).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn submit_async_resolves_to_result() {
        let gateway = gateway();
        let pending = gateway.submit_async(count("c"));
        assert_eq!(pending.await.unwrap(), serde_json::json!(1));
    }

    #[tokio::test]
    async fn dropped_future_still_applies_command() {
        let gateway = gateway();
        drop(gateway.submit_async(count("c")));

        tokio::time::timeout(Duration::from_secs(1), async {
            while gateway.runtime().log().event_count().await == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("command should complete after its future was dropped");
    }

    #[tokio::test]
    async fn clones_share_one_runtime() {
        let gateway = gateway();
        let other = gateway.clone();

        gateway.submit(count("c")).await.unwrap();
        let n = other.submit(count("c")).await.unwrap();
        assert_eq!(n, serde_json::json!(2));
    }
}
