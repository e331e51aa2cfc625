//! Request dispatch
//!
//! Maps one decoded request onto topic store operations and queues the
//! resulting frames. The caller holds the broker lock for the whole call, so
//! a subscribe's backlog replay and a publish's fan-out are atomic with
//! respect to every other connection: a payload published while someone
//! subscribes reaches them exactly once, either in the replay or live.

use serde_json::Value;
use tracing::debug;

use crate::broker::{Broker, ConnectionId, Push};
use crate::transport::message::{Reply, Request, decode_request};
use crate::utils::error::BrokerError;

/// Decode and apply one inbound line.
///
/// Protocol errors are answered on the connection and are not errors here.
/// An `Err` means the session can't continue (its own outbound path is gone).
pub fn handle_line(
    broker: &mut Broker,
    id: &ConnectionId,
    line: &str,
) -> Result<(), BrokerError> {
    match decode_request(line) {
        Ok(request) => dispatch(broker, id, request),
        Err(err) => {
            debug!("Rejected request from {id}: {err}");
            broker.deliver(id, &Reply::from(err))
        }
    }
}

pub fn dispatch(
    broker: &mut Broker,
    id: &ConnectionId,
    request: Request,
) -> Result<(), BrokerError> {
    match request {
        Request::Publish { topic, message } => {
            broker.publish(&topic, message.clone());
            broker.deliver(
                id,
                &Reply::Published {
                    topic: topic.clone(),
                },
            )?;
            let delivered = broker.fan_out(&topic, &message);
            debug!("{id} published to {topic} ({delivered} subscribers)");
        }
        Request::Subscribe { topic } => {
            let backlog = broker.subscribe(&topic, id)?;
            broker.deliver(
                id,
                &Reply::Subscribed {
                    topic: topic.clone(),
                },
            )?;
            let replayed = backlog.len();
            for data in backlog {
                broker.deliver(id, &Push::new(&topic, data))?;
            }
            debug!("{id} subscribed to {topic} ({replayed} replayed)");
        }
        Request::Unsubscribe { topic } => {
            broker.unsubscribe(&topic, id);
            debug!("{id} unsubscribed from {topic}");
            broker.deliver(id, &Reply::Unsubscribed { topic })?;
        }
        Request::Get { topic } => {
            let data = broker.fetch(&topic).unwrap_or(Value::Null);
            broker.deliver(id, &Reply::Ok { topic, data })?;
        }
    }
    Ok(())
}
