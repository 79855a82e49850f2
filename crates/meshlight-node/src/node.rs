//! Node runtime: one task owning the OnOff server and client.
//!
//! Inbound frames, timer fires and local commands are all funnelled through a
//! single channel and handled one at a time, so the models never see
//! concurrent access. The task also owns the one outstanding transition timer.

use std::sync::Arc;

use meshlight_onoff::{
    Actuator, Address, ClientConfig, InboundMessage, ObservedStatus, Opcode, SchedulerState,
    ServerConfig, StateClient, StateServer, TimerArm, Timing,
};
use meshlight_transfer::MeshLink;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::provisioning::{self, Credentials, Provisioned};

/// Reply channel for a request to the node task.
pub type Responder<T> = oneshot::Sender<Result<T>>;

/// Everything the node task reacts to.
#[derive(Debug)]
pub enum NodeEvent {
    /// A frame accepted by the transport
    Inbound(InboundMessage),
    /// The transition timer armed with `generation` elapsed
    TimerFired { generation: u64 },
    /// Button press
    LocalTrigger(Responder<TriggerOutcome>),
    /// Query `dst` for its state
    Get { dst: Address, reply: Responder<()> },
    /// Explicit SET to `dst`
    Set {
        dst: Address,
        value: bool,
        timing: Option<Timing>,
        acknowledged: bool,
        reply: Responder<u8>,
    },
    /// Provision now with the configured credentials
    Provision(Responder<Provisioned>),
    /// Health attention on/off
    Attention(bool),
    /// Snapshot request
    Status(Responder<NodeStatus>),
    /// Stop the event loop
    Shutdown,
}

/// What a local trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// The node was unprovisioned and provisioned itself instead of sending
    Provisioned(Provisioned),
    /// A SET-UNACK went out
    Sent { value: bool, tid: u8 },
}

/// Point-in-time view of a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub address: Address,
    pub provisioned: Option<Provisioned>,
    pub value: bool,
    pub target: Option<bool>,
    pub scheduler: SchedulerState,
    pub remaining_ms: u64,
    pub last_known: bool,
    pub next_tid: u8,
    pub last_observed: Option<ObservedStatus>,
    pub attention: bool,
}

/// Cheap, cloneable handle to a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl NodeHandle {
    /// Press the button.
    pub async fn trigger(&self) -> Result<TriggerOutcome> {
        self.request(NodeEvent::LocalTrigger).await
    }

    /// Send a GET to `dst`.
    pub async fn get(&self, dst: Address) -> Result<()> {
        self.request(|reply| NodeEvent::Get { dst, reply }).await
    }

    /// Send a SET (acknowledged or not) to `dst`. Returns the tid used.
    pub async fn set(
        &self,
        dst: Address,
        value: bool,
        timing: Option<Timing>,
        acknowledged: bool,
    ) -> Result<u8> {
        self.request(|reply| NodeEvent::Set {
            dst,
            value,
            timing,
            acknowledged,
            reply,
        })
        .await
    }

    /// Provision with the configured credentials. Idempotent.
    pub async fn provision(&self) -> Result<Provisioned> {
        self.request(NodeEvent::Provision).await
    }

    /// Current node state.
    pub async fn status(&self) -> Result<NodeStatus> {
        self.request(NodeEvent::Status).await
    }

    /// Switch attention on or off.
    pub fn attention(&self, on: bool) -> Result<()> {
        self.send(NodeEvent::Attention(on))
    }

    /// Stop the node task.
    pub fn shutdown(&self) -> Result<()> {
        self.send(NodeEvent::Shutdown)
    }

    fn send(&self, event: NodeEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::Stopped)
    }

    async fn request<R>(&self, make: impl FnOnce(Responder<R>) -> NodeEvent) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| Error::Stopped)?
    }
}

/// A mesh node: OnOff server and client on one element.
pub struct MeshNode<T, A> {
    link: Arc<T>,
    server: StateServer<A>,
    client: StateClient,
    credentials: Credentials,
    device_id: Vec<u8>,
    auto_provision: bool,
    provisioned: Option<Provisioned>,
    attention: bool,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    events_rx: mpsc::UnboundedReceiver<NodeEvent>,
    timer: Option<JoinHandle<()>>,
}

impl<T, A> MeshNode<T, A>
where
    T: MeshLink + 'static,
    A: Actuator + 'static,
{
    /// Build a node on `link` and register its receive handler.
    pub fn new(config: &NodeConfig, link: Arc<T>, actuator: A) -> Result<(Self, NodeHandle)> {
        let credentials = config.credentials()?;
        let device_id = match config.device_id_bytes()? {
            id if id.is_empty() => {
                let id = provisioning::generated_device_id().to_vec();
                info!(device_id = %hex::encode(&id), "no device id configured, generated one");
                id
            }
            id => id,
        };
        let address = provisioning::derive_address(&device_id);

        let server = StateServer::new(
            ServerConfig::new(address)
                .with_layout(config.layout)
                .with_initial_value(config.initial_value),
            actuator,
        );
        let client = StateClient::new(ClientConfig::new(address).with_layout(config.layout));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inbound_tx = events_tx.clone();
        link.on_receive(Box::new(move |msg| {
            let _ = inbound_tx.send(NodeEvent::Inbound(msg));
        }));

        let handle = NodeHandle {
            tx: events_tx.clone(),
        };
        let node = Self {
            link,
            server,
            client,
            credentials,
            device_id,
            auto_provision: config.auto_provision,
            provisioned: None,
            attention: false,
            events_tx,
            events_rx,
            timer: None,
        };
        Ok((node, handle))
    }

    /// Run the event loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the event loop until [`NodeEvent::Shutdown`].
    pub async fn run(mut self) {
        info!(
            address = %self.server.address(),
            layout = ?self.server.layout(),
            "Meshlight node running"
        );

        while let Some(event) = self.events_rx.recv().await {
            if matches!(event, NodeEvent::Shutdown) {
                break;
            }
            self.handle_event(event);
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        info!(address = %self.server.address(), "Meshlight node stopped");
    }

    fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Inbound(msg) => self.on_inbound(msg),
            NodeEvent::TimerFired { generation } => {
                if let Some(arm) = self.server.on_timer(generation, Instant::now()) {
                    self.arm_timer(arm);
                }
            }
            NodeEvent::LocalTrigger(reply) => {
                let _ = reply.send(self.on_local_trigger());
            }
            NodeEvent::Get { dst, reply } => {
                let _ = reply.send(self.client.send_get(&*self.link, dst).map_err(Error::from));
            }
            NodeEvent::Set {
                dst,
                value,
                timing,
                acknowledged,
                reply,
            } => {
                let result = self
                    .client
                    .send_set(&*self.link, dst, value, timing, acknowledged)
                    .map_err(Error::from);
                let _ = reply.send(result);
            }
            NodeEvent::Provision(reply) => {
                let _ = reply.send(Ok(self.provision()));
            }
            NodeEvent::Attention(on) => {
                self.attention = on;
                debug!(on, "attention");
                self.server.actuator_mut().set(on);
            }
            NodeEvent::Status(reply) => {
                let _ = reply.send(Ok(self.status()));
            }
            NodeEvent::Shutdown => {}
        }
    }

    fn on_inbound(&mut self, msg: InboundMessage) {
        let opcode = match Opcode::from_raw(msg.opcode) {
            Ok(op) => op,
            Err(e) => {
                debug!(src = %msg.ctx.src, "dropping message: {}", e);
                return;
            }
        };

        if opcode == Opcode::Status {
            if let Err(e) = self.client.handle_status(&msg.ctx, &msg.body) {
                debug!(src = %msg.ctx.src, "dropping status: {}", e);
            }
            return;
        }

        let out = match self
            .server
            .handle_message(&msg.ctx, opcode, &msg.body, Instant::now())
        {
            Ok(out) => out,
            Err(e) => {
                debug!(src = %msg.ctx.src, "dropping message: {}", e);
                return;
            }
        };

        if let Some(arm) = out.arm {
            self.arm_timer(arm);
        }
        if let Some(reply) = out.reply {
            let dst = msg.ctx.reply_to();
            if let Err(e) = self
                .link
                .send(dst, msg.ctx.app_idx, Opcode::Status.raw(), reply)
            {
                warn!(dst = %dst, "status reply not sent: {}", e);
            }
        }
    }

    fn on_local_trigger(&mut self) -> Result<TriggerOutcome> {
        if self.provisioned.is_none() && self.auto_provision {
            return Ok(TriggerOutcome::Provisioned(self.provision()));
        }

        let value = self.client.trigger_local_change(&*self.link)?;
        Ok(TriggerOutcome::Sent {
            value,
            tid: self.client.next_tid().wrapping_sub(1),
        })
    }

    /// Install credentials, bind the client and configure the transport.
    fn provision(&mut self) -> Provisioned {
        if let Some(done) = self.provisioned {
            return done;
        }

        let done = provisioning::provision(&self.credentials, &self.device_id);
        self.link.set_identity(done.identity());
        self.client.set_address(done.address);
        self.client.set_binding(done.binding);
        self.provisioned = Some(done);

        info!(
            address = %done.address,
            network = %done.network_id,
            "Provisioned and configured"
        );
        done
    }

    fn arm_timer(&mut self, arm: TimerArm) {
        if let Some(previous) = self.timer.take() {
            previous.abort();
        }
        let tx = self.events_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(arm.deadline).await;
            let _ = tx.send(NodeEvent::TimerFired {
                generation: arm.generation,
            });
        }));
    }

    fn status(&self) -> NodeStatus {
        let now = Instant::now();
        let state = self.server.state(now);
        NodeStatus {
            address: self.server.address(),
            provisioned: self.provisioned,
            value: state.value,
            target: self.server.scheduler().target(),
            scheduler: self.server.scheduler().state(),
            remaining_ms: state.transition_remaining.as_millis() as u64,
            last_known: self.client.last_known(),
            next_tid: self.client.next_tid(),
            last_observed: self.client.last_status(),
            attention: self.attention,
        }
    }
}
