//! In-process harness: clients talk to a shared `MessageRouter` through a sink that
//! calls `handle` directly, and negotiate over a scripted transport.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use raidcast::config::RelayConfig;
use raidcast::relay::{
    ClientMessage, IdentityResolver, MessageRouter, NullChatStore, ServerMessage,
};
use raidcast::webrtc::{
    IceCandidate, LocalTrack, MediaTransport, OrchestratorEvent, PeerOrchestrator, PeerRole,
    SdpAnswer, SdpOffer, SignalingSink, TransportEventSink, TransportFactory,
};
use raidcast::Result;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn router() -> Arc<MessageRouter> {
    Arc::new(MessageRouter::new(
        &RelayConfig::default(),
        Arc::new(NullChatStore),
        Arc::new(IdentityResolver),
    ))
}

#[derive(Default)]
pub struct ScriptedTransport {
    pub applied: Mutex<Vec<String>>,
    pub remote_sdp: Mutex<Option<String>>,
    pub closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for ScriptedTransport {
    async fn add_track(&self, _track: LocalTrack) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SdpOffer> {
        Ok(SdpOffer::new("v=0 offer"))
    }

    async fn accept_offer(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        *self.remote_sdp.lock() = Some(offer.sdp);
        Ok(SdpAnswer::new("v=0 answer"))
    }

    async fn accept_answer(&self, answer: SdpAnswer) -> Result<()> {
        *self.remote_sdp.lock() = Some(answer.sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.applied.lock().push(candidate.candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Created {
    pub remote_id: String,
    pub role: PeerRole,
    pub transport: Arc<ScriptedTransport>,
    pub events: TransportEventSink,
}

#[derive(Default)]
pub struct ScriptedFactory {
    created: Mutex<Vec<Arc<Created>>>,
}

impl ScriptedFactory {
    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recent transport created for `remote_id`
    pub fn latest(&self, remote_id: &str) -> Option<Arc<Created>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|c| c.remote_id == remote_id)
            .cloned()
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn create(
        &self,
        remote_id: &str,
        role: PeerRole,
        events: TransportEventSink,
    ) -> Result<Arc<dyn MediaTransport>> {
        let transport = Arc::new(ScriptedTransport::default());
        self.created.lock().push(Arc::new(Created {
            remote_id: remote_id.to_string(),
            role,
            transport: transport.clone(),
            events,
        }));
        Ok(transport)
    }
}

/// Delivers client messages straight into the router as connection `conn_id`
pub struct RouterSink {
    router: Arc<MessageRouter>,
    conn_id: String,
}

impl SignalingSink for RouterSink {
    fn send(&self, msg: ClientMessage) -> Result<()> {
        self.router.handle(&self.conn_id, msg);
        Ok(())
    }
}

/// One client process: a relay connection plus its orchestrator
pub struct TestClient {
    pub id: String,
    pub orchestrator: Arc<PeerOrchestrator>,
    pub factory: Arc<ScriptedFactory>,
    pub events: broadcast::Receiver<OrchestratorEvent>,
    /// Copy of every server message the client received
    pub seen: mpsc::UnboundedReceiver<ServerMessage>,
}

impl TestClient {
    pub fn connect(router: &Arc<MessageRouter>, timeout: Duration) -> Self {
        let (id, mut inbound) = router.connect();
        let factory = Arc::new(ScriptedFactory::default());
        let sink = Arc::new(RouterSink {
            router: router.clone(),
            conn_id: id.clone(),
        });
        let orchestrator = PeerOrchestrator::new(factory.clone(), sink, timeout);
        let events = orchestrator.subscribe();

        let (seen_tx, seen) = mpsc::unbounded_channel();
        let pump = orchestrator.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                pump.handle_server_message(msg.clone()).await;
                let _ = seen_tx.send(msg);
            }
        });

        Self {
            id,
            orchestrator,
            factory,
            events,
            seen,
        }
    }

    /// Wait for a server message matching `pred`, skipping others
    pub async fn expect_seen<F>(&mut self, mut pred: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                let msg = self.seen.recv().await.expect("relay connection closed");
                if pred(&msg) {
                    return msg;
                }
            }
        })
        .await
        .expect("timed out waiting for server message")
    }

    /// Wait for an orchestrator event matching `pred`, skipping others
    pub async fn expect_event<F>(&mut self, mut pred: F) -> OrchestratorEvent
    where
        F: FnMut(&OrchestratorEvent) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for orchestrator event")
    }
}

/// Poll `check` until it returns true
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
