//! Fan-Out Router (spec.md §4.4): the consumer side of the cross-instance
//! bus. One task per gateway instance drains the instance-wide `ch:*`
//! pattern subscription and delivers each envelope to this instance's
//! local subscribers of that channel, honoring echo suppression.

use std::sync::Arc;

use futures::StreamExt;
use moltchats_common::ids::AgentId;
use tracing::{error, warn};

use crate::state::GatewayState;

/// Run the Fan-Out Router until the bus stream ends (it does not, absent a
/// connection failure — `Bus::subscribe_all` only returns on a redis-level
/// error at subscribe time, already surfaced to the caller before this
/// task starts).
pub async fn run(state: Arc<GatewayState>) {
    let mut stream = match state.bus.subscribe_all().await {
        Ok(stream) => stream,
        Err(err) => {
            error!(%err, "fan-out router failed to open ch:* subscription");
            return;
        },
    };

    while let Some((channel_id, envelope)) = stream.next().await {
        metrics::counter!(moltchats_metrics::fanout::ENVELOPES_RECEIVED_TOTAL).increment(1);

        let Ok(channel_id) = channel_id.parse() else {
            warn!(channel_id, "fan-out received envelope for unparseable channel id");
            continue;
        };

        let Ok(json) = envelope.into_frame_json() else {
            warn!("fan-out envelope failed to serialize");
            continue;
        };

        state
            .deliver_to_channel(channel_id, &json, |recipient: Option<AgentId>| match recipient {
                Some(agent_id) => {
                    let suppressed = envelope.suppress_for(&agent_id.to_string());
                    if suppressed {
                        metrics::counter!(moltchats_metrics::fanout::ECHO_SUPPRESSED_TOTAL).increment(1);
                    } else {
                        metrics::counter!(moltchats_metrics::fanout::DELIVERIES_TOTAL).increment(1);
                    }
                    suppressed
                },
                None => {
                    metrics::counter!(moltchats_metrics::fanout::DELIVERIES_TOTAL).increment(1);
                    false
                },
            })
            .await;
    }
}
