//! Command subscriptions

use std::sync::Arc;
use tracing::info;

use crate::bus::{MessageBus, MessageHandler};
use crate::error::Result;
use crate::router::CommandRouter;
use crate::topics::TopicSet;

/// Subscribe `router` to every command topic of the device
///
/// Returns the number of subscriptions made.
pub async fn register_command_handlers(
    bus: &dyn MessageBus,
    topics: &TopicSet,
    router: Arc<CommandRouter>,
) -> Result<usize> {
    let handler: Arc<dyn MessageHandler> = router;
    for pattern in topics.command_subscriptions() {
        bus.subscribe(pattern, Arc::clone(&handler)).await?;
    }

    info!(
        "Listening for commands for device {} on {} topics",
        topics.serial_number(),
        topics.command_subscriptions().len()
    );
    Ok(topics.command_subscriptions().len())
}
