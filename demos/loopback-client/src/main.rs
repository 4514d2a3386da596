//! Loopback client: a `ContentsManager` talking to an in-process engine.
//!
//! Run with: cargo run -p loopback-client [-- path/to/config.json]
//!
//! Without a config the client is pointed at the loopback engine through an
//! engine override. The engine creates one surface per tab, answers
//! navigation requests and ends the connection once the tab is closed.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use bytes::Bytes;
use thin_client::ContentsManager;
use thin_client_core::{
    Envelope, Payload, RelaySender, TabId,
    envelope::ProtocolControlMessage,
    features::{
        navigation::{NavigationMessage, NavigationState},
        render_surface::{
            CompositorMessage, GestureEvent, GestureKind, LifecycleKind, LifecycleNotice,
        },
        tab_control::TabControlMessage,
    },
};
use thin_client_render::{CompositorAdapter, LayerId, SurfaceFactory, SurfaceSender};
use thin_client_session::{
    ConnectionSession, CredentialBackend, EngineOverride, HttpAssignerClient,
    SessionConfig, SessionEvent, SessionParts, SubscriptionId, TokenResponse,
};
use thin_client_transport::{ChannelTransportFactory, EngineEnd, TransportKind};
use tokio::runtime::Handle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SURFACE_ID: i32 = 1;

/// Always signed in, always has a token.
struct DemoBackend;

impl CredentialBackend for DemoBackend {
    fn active_account_id(&self) -> Option<String> {
        Some("demo-account".to_string())
    }

    fn active_username(&self) -> Option<String> {
        Some("demo@localhost".to_string())
    }

    fn has_refresh_credential(&self, _account_id: &str) -> bool {
        true
    }

    fn request_token(&mut self, account_id: &str, reply: RelaySender<TokenResponse>) {
        reply.post(TokenResponse {
            account_id: account_id.to_string(),
            result: Ok("demo-access-token".to_string()),
        });
    }

    fn subscribe_credential_available(&mut self, _notify: RelaySender<String>) -> SubscriptionId {
        SubscriptionId(0)
    }

    fn unsubscribe(&mut self, _subscription: SubscriptionId) {}
}

/// Compositor that only logs what it is asked to do.
struct LoggingCompositor {
    surface_id: i32,
    frames: usize,
}

impl CompositorAdapter for LoggingCompositor {
    fn root_layer(&self) -> LayerId {
        LayerId::new(u64::from(self.surface_id.unsigned_abs()))
    }

    fn set_visible(&mut self, visible: bool) {
        tracing::info!(surface_id = self.surface_id, visible, "Compositor visibility");
    }

    fn on_compositor_message(&mut self, bytes: Bytes) {
        self.frames += 1;
        tracing::info!(
            surface_id = self.surface_id,
            frame = self.frames,
            len = bytes.len(),
            "Compositor frame"
        );
    }
}

struct LoggingSurfaces;

impl SurfaceFactory for LoggingSurfaces {
    fn create_compositor(&mut self, outbound: &SurfaceSender) -> Box<dyn CompositorAdapter> {
        Box::new(LoggingCompositor {
            surface_id: outbound.surface_id(),
            frames: 0,
        })
    }
}

fn loopback_config() -> SessionConfig {
    SessionConfig::default().with_engine_override(EngineOverride {
        endpoint: ([127, 0, 0, 1], 11000).into(),
        transport: TransportKind::Tcp,
        client_token: "loopback".to_string(),
        certificate_path: None,
    })
}

fn load_config() -> anyhow::Result<SessionConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(loopback_config());
    };
    let json = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {path}"))?;
    SessionConfig::from_json_str(&json).with_context(|| format!("Invalid config in {path}"))
}

/// Minimal engine: one surface per tab, echoes navigation.
async fn run_engine(mut engine: EngineEnd) -> anyhow::Result<()> {
    while let Some(envelope) = engine.recv().await {
        let tab_id = envelope.target_tab_id();
        match envelope.into_payload() {
            Payload::ProtocolControl(ProtocolControlMessage::StartConnection {
                client_token,
                protocol_version,
            }) => {
                tracing::info!(%client_token, protocol_version, "Engine: client connected");
            }
            Payload::TabControl(TabControlMessage::CreateTab) => {
                for kind in [LifecycleKind::Created, LifecycleKind::Initialized] {
                    engine.send(&lifecycle(tab_id, kind))?;
                }
                engine.send(&Envelope::new(
                    tab_id,
                    Payload::RenderSurfaceCompositor(CompositorMessage {
                        surface_id: SURFACE_ID,
                        bytes: Bytes::from_static(b"first frame"),
                    }),
                ))?;
            }
            Payload::Navigation(NavigationMessage::LoadUrl { url }) => {
                engine.send(&navigation(tab_id, NavigationState {
                    url: Some(url),
                    title: Some("Loopback".to_string()),
                    loading: Some(false),
                    page_load_completed: Some(true),
                }))?;
            }
            Payload::RenderSurfaceInput(input) => {
                tracing::info!(surface_id = input.surface_id, kind = ?input.gesture.kind, "Engine: input");
            }
            Payload::TabControl(TabControlMessage::CloseTab) => {
                tracing::info!(tab_id, "Engine: tab closed, ending connection");
                engine.close(0)?;
            }
            other => tracing::debug!(?other, "Engine: ignoring"),
        }
    }
    Ok(())
}

fn lifecycle(tab_id: TabId, kind: LifecycleKind) -> Envelope {
    Envelope::new(
        tab_id,
        Payload::RenderSurfaceLifecycle(LifecycleNotice {
            surface_id: SURFACE_ID,
            kind,
        }),
    )
}

fn navigation(tab_id: TabId, state: NavigationState) -> Envelope {
    Envelope::new(
        tab_id,
        Payload::Navigation(NavigationMessage::StateChanged(state)),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config()?;
    let (factory, mut accepted) = ChannelTransportFactory::new();
    tokio::spawn(async move {
        while let Some(engine) = accepted.recv().await {
            tracing::info!(endpoint = %engine.endpoint, kind = %engine.kind, "Engine: accepted");
            tokio::spawn(async move {
                if let Err(e) = run_engine(engine.engine).await {
                    tracing::warn!("Engine stopped: {e}");
                }
            });
        }
    });

    let assigner = HttpAssignerClient::new(config.assigner_url.clone(), Handle::current());
    let SessionParts {
        session,
        network,
        outbound,
    } = ConnectionSession::build(
        &config,
        Box::new(DemoBackend),
        Box::new(assigner),
        Arc::new(factory),
    );
    tokio::spawn(network.run());

    let mut manager = ContentsManager::new(session, outbound);
    manager.connect();

    let mut tab: Option<TabId> = None;
    let mut touched = false;
    let mut ticker = tokio::time::interval(Duration::from_millis(10));

    loop {
        ticker.tick().await;

        for event in manager.process_pending()? {
            match event {
                SessionEvent::Connected(endpoint) => {
                    tracing::info!(%endpoint, "Connected");
                    let tab_id = manager.create_contents(Box::new(LoggingSurfaces))?;
                    if let Some(contents) = manager.contents(tab_id) {
                        contents.set_size(1280, 720, 1.0);
                        contents.set_visible(true);
                        contents.load_url("https://example.com/");
                    }
                    tab = Some(tab_id);
                }
                SessionEvent::Disconnected(reason) => {
                    tracing::info!(%reason, "Disconnected");
                    return Ok(());
                }
                SessionEvent::AuthenticationFailed(e) => anyhow::bail!("Authentication failed: {e}"),
                SessionEvent::AssignmentFailed(result) => {
                    anyhow::bail!("Assignment failed: {result}")
                }
                SessionEvent::Inbound(_) => {}
            }
        }

        let Some(tab_id) = tab else { continue };
        let Some(contents) = manager.contents(tab_id) else {
            continue;
        };

        let navigation = contents.navigation();
        let active = contents.documents().active_surface().is_some();
        if active && !touched {
            touched = contents.on_touch_event(&GestureEvent {
                kind: GestureKind::Tap,
                x: 640.0,
                y: 360.0,
                timestamp_ms: 0,
            });
        }
        if touched && navigation.page_load_completed {
            tracing::info!(url = %navigation.url, title = %navigation.title, "Page loaded, closing tab");
            manager.close_contents(tab_id)?;
        }
    }
}
