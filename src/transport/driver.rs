//! Async search driver shared by every transport.

use crate::devices::{DeviceMetadata, Frame};
use crate::sensors::SensorError;
use crate::transport::{SearchDriver, SearchReporter, SearchRequest};
use futures::stream::{BoxStream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// Item delivered by a connected transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(Frame),
    Metadata(DeviceMetadata),
}

/// Everything a transport delivers for one device. The stream ends when the
/// link is gone.
pub type FrameStream = BoxStream<'static, TransportEvent>;

/// A protocol stack able to find one device and stream its data.
pub trait ProtocolTransport: Send + Sync + 'static {
    /// Locate and connect to the requested device.
    ///
    /// May take arbitrarily long; the driver applies the search timeout and
    /// the cancellation signal around it.
    fn connect(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<FrameStream, SensorError>> + Send;
}

/// [`SearchDriver`] running one tokio task per search.
///
/// A search fails when the transport errors, when the stream ends before
/// the first measurement, or when no measurement arrived before the search
/// timeout. After the first measurement the end of the stream is a lost
/// connection. A cancelled search stops silently.
#[derive(Debug)]
pub struct TokioSearchDriver<T> {
    transport: Arc<T>,
    runtime: Handle,
}

impl<T: ProtocolTransport> TokioSearchDriver<T> {
    pub fn new(transport: Arc<T>, runtime: Handle) -> Self {
        Self { transport, runtime }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T: ProtocolTransport> SearchDriver for TokioSearchDriver<T> {
    fn begin_search(&self, request: SearchRequest, reporter: SearchReporter) {
        let transport = self.transport.clone();
        self.runtime
            .spawn(run_search(transport, request, reporter));
    }
}

enum Next {
    Cancelled,
    TimedOut,
    Event(Option<TransportEvent>),
}

async fn run_search<T: ProtocolTransport>(
    transport: Arc<T>,
    request: SearchRequest,
    reporter: SearchReporter,
) {
    let device_id = request.device_id;
    let mut cancel = request.cancel.clone();
    let deadline = Instant::now() + request.timeout;

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("Search for {} cancelled while connecting", device_id);
            return;
        }
        result = tokio::time::timeout_at(deadline, transport.connect(&request)) => result,
    };

    let mut events = match connected {
        Ok(Ok(events)) => events,
        Ok(Err(e)) => {
            tracing::warn!("Search for {} failed: {}", device_id, e);
            report_not_found(&request, &reporter);
            return;
        }
        Err(_) => {
            tracing::warn!("Search for {} timed out while connecting", device_id);
            report_not_found(&request, &reporter);
            return;
        }
    };

    let mut receiving = false;
    loop {
        let next = if receiving {
            tokio::select! {
                _ = cancel.cancelled() => Next::Cancelled,
                event = events.next() => Next::Event(event),
            }
        } else {
            tokio::select! {
                _ = cancel.cancelled() => Next::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Next::TimedOut,
                event = events.next() => Next::Event(event),
            }
        };

        match next {
            Next::Cancelled => {
                tracing::debug!("Search for {} cancelled", device_id);
                return;
            }
            Next::TimedOut => {
                tracing::warn!(
                    "No data from {} within {:?}",
                    device_id,
                    request.timeout
                );
                report_not_found(&request, &reporter);
                return;
            }
            Next::Event(Some(TransportEvent::Frame(frame))) => {
                receiving = reporter.frame(device_id, frame) || receiving;
            }
            Next::Event(Some(TransportEvent::Metadata(metadata))) => {
                reporter.metadata(device_id, metadata);
            }
            Next::Event(None) if receiving => {
                if !request.cancel.is_cancelled() {
                    reporter.connection_lost(device_id);
                }
                return;
            }
            Next::Event(None) => {
                tracing::warn!("{} went away before sending data", device_id);
                report_not_found(&request, &reporter);
                return;
            }
        }
    }
}

fn report_not_found(request: &SearchRequest, reporter: &SearchReporter) {
    if !request.cancel.is_cancelled() {
        reporter.not_found(request.device_id);
    }
}
