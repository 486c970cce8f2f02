//! In-process transport replaying scripted data.
//!
//! Stands in for a radio stack in tests and in the demo binary, and is the
//! way ANT+ pages reach the device layer on hosts without an ANT stick.

use crate::devices::{DeviceId, Frame};
use crate::sensors::SensorError;
use crate::transport::driver::{FrameStream, ProtocolTransport, TransportEvent};
use crate::transport::SearchRequest;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

/// How a simulated device behaves when searched for.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedBehaviour {
    /// The search fails right away
    Unreachable,
    /// Connects but never sends anything
    Silent,
    /// Sends `events` with `interval` between them, then disconnects.
    /// With `repeat` the script loops until the search is cancelled.
    Script {
        events: Vec<TransportEvent>,
        interval: Duration,
        repeat: bool,
    },
}

impl SimulatedBehaviour {
    /// Frames only, sent once.
    pub fn frames(frames: Vec<Frame>, interval: Duration) -> Self {
        SimulatedBehaviour::Script {
            events: frames.into_iter().map(TransportEvent::Frame).collect(),
            interval,
            repeat: false,
        }
    }

    /// Frames only, looping.
    pub fn looping(frames: Vec<Frame>, interval: Duration) -> Self {
        SimulatedBehaviour::Script {
            events: frames.into_iter().map(TransportEvent::Frame).collect(),
            interval,
            repeat: true,
        }
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    behaviours: HashMap<DeviceId, SimulatedBehaviour>,
    attempts: HashMap<DeviceId, usize>,
}

#[derive(Debug, Default)]
pub struct SimulatedTransport {
    state: Mutex<SimulatedState>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device_id: DeviceId, behaviour: SimulatedBehaviour) -> Self {
        self.set_behaviour(device_id, behaviour);
        self
    }

    pub fn set_behaviour(&self, device_id: DeviceId, behaviour: SimulatedBehaviour) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .behaviours
            .insert(device_id, behaviour);
    }

    /// Number of connection attempts made for a device.
    pub fn attempts(&self, device_id: DeviceId) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .attempts
            .get(&device_id)
            .copied()
            .unwrap_or(0)
    }

    fn open(&self, device_id: DeviceId) -> Result<FrameStream, SensorError> {
        let behaviour = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *state.attempts.entry(device_id).or_insert(0) += 1;
            state.behaviours.get(&device_id).cloned()
        };

        match behaviour {
            None | Some(SimulatedBehaviour::Unreachable) => {
                Err(SensorError::DeviceNotFound(device_id.to_string()))
            }
            Some(SimulatedBehaviour::Silent) => Ok(stream::pending().boxed()),
            Some(SimulatedBehaviour::Script {
                events,
                interval,
                repeat,
            }) => {
                let paced = move |event: TransportEvent| async move {
                    tokio::time::sleep(interval).await;
                    event
                };
                if repeat && !events.is_empty() {
                    Ok(stream::iter(events).cycle().then(paced).boxed())
                } else {
                    Ok(stream::iter(events).then(paced).boxed())
                }
            }
        }
    }
}

impl ProtocolTransport for SimulatedTransport {
    fn connect(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<FrameStream, SensorError>> + Send {
        tracing::debug!("Simulated connect to {}", request.device_id);
        let result = self.open(request.device_id);
        async move { result }
    }
}
