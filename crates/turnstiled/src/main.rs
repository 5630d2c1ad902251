//! turnstiled - the entitlement background service
//!
//! This is the main entry point for the turnstiled service.
//! It wires together all the components:
//! - Catalog loading
//! - Store initialization
//! - Entitlement issuer
//! - Expiry sweeper
//! - IPC server

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use turnstile_api::{
    Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Response, ResponsePayload,
};
use turnstile_catalog::{Catalog, load_catalog};
use turnstile_core::{CoreEvent, Issuer, Sweeper, UnlockError};
use turnstile_ipc::{IpcServer, ServerMessage};
use turnstile_store::{SqliteStore, Store, StoreError};
use turnstile_util::{ClientId, RateLimiter, default_catalog_path};

/// turnstiled - credit-metered entitlement service
#[derive(Parser, Debug)]
#[command(name = "turnstiled")]
#[command(about = "Entitlement service: unlock grants, credit ledger, session windows", long_about = None)]
struct Args {
    /// Catalog file path (default: ~/.config/turnstiled/catalog.toml)
    #[arg(short, long, default_value_os_t = default_catalog_path())]
    config: PathBuf,

    /// Socket path override (or set TURNSTILE_SOCKET env var)
    #[arg(short, long, env = "TURNSTILE_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set TURNSTILE_DATA_DIR env var)
    #[arg(short, long, env = "TURNSTILE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    issuer: Arc<Issuer>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    rate_limiter: RateLimiter,
    catalog_path: PathBuf,
    sweep_interval: Duration,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        // Load catalog; a missing file means the built-in defaults
        let catalog = if args.config.exists() {
            let catalog = load_catalog(&args.config)
                .with_context(|| format!("Failed to load catalog from {:?}", args.config))?;
            info!(
                catalog_path = %args.config.display(),
                component_count = catalog.component_count(),
                "Catalog loaded"
            );
            catalog
        } else {
            warn!(
                catalog_path = %args.config.display(),
                "Catalog file not found, using built-in defaults"
            );
            Catalog::default()
        };

        // Determine paths
        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| catalog.service().socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| catalog.service().data_dir.clone());

        // Create data directory
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize store
        let db_path = data_dir.join("turnstiled.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let sweep_interval = catalog.service().sweep_interval;

        // Initialize issuer
        let issuer = Arc::new(Issuer::new(catalog, store.clone()));

        // Initialize IPC server
        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        // Rate limiter: 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            issuer,
            ipc: Arc::new(ipc),
            store,
            rate_limiter,
            catalog_path: args.config.clone(),
            sweep_interval,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc_ref = self.ipc.clone();
        let mut ipc_messages = ipc_ref
            .take_message_receiver()
            .await
            .expect("Message receiver should be available");

        let issuer = self.issuer.clone();
        let store = self.store.clone();
        let catalog_path = self.catalog_path.clone();
        let rate_limiter = Arc::new(Mutex::new(self.rate_limiter));

        // Core event channel; the sweeper feeds it, command handlers
        // broadcast their events directly.
        let (core_events_tx, mut core_events) = mpsc::unbounded_channel();

        // Spawn the expiry sweeper
        let _sweeper_handle =
            Sweeper::new(store.clone(), self.sweep_interval, core_events_tx).spawn();

        // Spawn IPC accept task
        let ipc_accept = ipc_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        // Set up signal handlers
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                // Sweeper (and any other background) events
                Some(event) = core_events.recv() => {
                    ipc_ref.broadcast_event(Event::new(core_event_payload(event)));
                }

                // IPC messages
                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&issuer, &store, &catalog_path, &ipc_ref, &rate_limiter, msg).await;
                }
            }
        }

        // Graceful shutdown; grants are already durable, nothing to flush.
        info!("Shutting down turnstiled");
        ipc_ref.broadcast_event(Event::new(EventPayload::Shutdown));

        info!("Shutdown complete");
        Ok(())
    }

    async fn handle_ipc_message(
        issuer: &Arc<Issuer>,
        store: &Arc<dyn Store>,
        catalog_path: &PathBuf,
        ipc: &Arc<IpcServer>,
        rate_limiter: &Arc<Mutex<RateLimiter>>,
        msg: ServerMessage,
    ) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                // Rate limiting
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.check(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                let response = Self::handle_command(
                    issuer,
                    store,
                    catalog_path,
                    ipc,
                    &client_id,
                    request.request_id,
                    request.command,
                )
                .await;

                let _ = ipc.send_response(&client_id, response).await;
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                // Clean up rate limiter
                let mut limiter = rate_limiter.lock().await;
                limiter.remove_client(&client_id);
            }
        }
    }

    async fn handle_command(
        issuer: &Arc<Issuer>,
        store: &Arc<dyn Store>,
        catalog_path: &PathBuf,
        ipc: &Arc<IpcServer>,
        client_id: &ClientId,
        request_id: u64,
        command: Command,
    ) -> Response {
        let now = turnstile_util::now();
        let role = ipc
            .get_client_info(client_id)
            .await
            .map(|info| info.role)
            .unwrap_or(turnstile_api::ClientRole::Observer);

        match command {
            Command::Unlock {
                account_id,
                component,
                declared_cost,
                tier,
            } => {
                if !role.can_unlock() {
                    return Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::PermissionDenied, "Unlock not permitted"),
                    );
                }

                match issuer
                    .request_unlock(&account_id, component, declared_cost, tier, now)
                    .await
                {
                    Ok((receipt, events)) => {
                        broadcast_core_events(ipc, events);
                        Response::success(request_id, ResponsePayload::Unlocked(receipt))
                    }
                    Err(e) => {
                        ipc.broadcast_event(Event::new(EventPayload::UnlockDenied {
                            account_id,
                            component,
                            code: unlock_error_code(&e),
                        }));
                        Response::error(request_id, unlock_error_info(&e))
                    }
                }
            }

            Command::Sessions { account_id } => {
                match issuer.active_sessions(&account_id, now) {
                    Ok(sessions) => {
                        Response::success(request_id, ResponsePayload::Sessions { sessions })
                    }
                    Err(e) => Response::error(request_id, unlock_error_info(&e)),
                }
            }

            Command::Balance { account_id } => match store.get_account(&account_id) {
                Ok(Some(account)) => Response::success(
                    request_id,
                    ResponsePayload::Balance {
                        account_id,
                        credits: account.balance,
                        tier: account.tier,
                    },
                ),
                Ok(None) => Response::error(
                    request_id,
                    ErrorInfo::new(
                        ErrorCode::UnknownAccount,
                        format!("unknown account: {}", account_id),
                    ),
                ),
                Err(e) => Response::error(request_id, store_error_info(&e)),
            },

            Command::History { account_id, limit } => {
                match store.transactions(&account_id, limit.min(500)) {
                    Ok(transactions) => Response::success(
                        request_id,
                        ResponsePayload::History {
                            transactions: transactions.iter().map(|t| t.to_view()).collect(),
                        },
                    ),
                    Err(e) => Response::error(request_id, store_error_info(&e)),
                }
            }

            Command::Catalog => Response::success(
                request_id,
                ResponsePayload::Catalog(issuer.catalog().to_view()),
            ),

            Command::GetHealth => {
                let health = HealthStatus {
                    live: true,
                    ready: true,
                    catalog_loaded: true,
                    store_ok: store.is_healthy(),
                };
                Response::success(request_id, ResponsePayload::Health(health))
            }

            Command::SubscribeEvents => Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: client_id.clone(),
                },
            ),

            Command::UnsubscribeEvents => {
                Response::success(request_id, ResponsePayload::Unsubscribed)
            }

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),

            // Admin commands

            Command::CreateAccount {
                account_id,
                tier,
                initial_balance,
            } => {
                if !role.can_administer() {
                    return admin_required(request_id);
                }

                match issuer.create_account(&account_id, tier, initial_balance).await {
                    Ok(events) => {
                        broadcast_core_events(ipc, events);
                        Response::success(request_id, ResponsePayload::AccountCreated { account_id })
                    }
                    Err(e) => Response::error(request_id, store_error_info(&e)),
                }
            }

            Command::Refill {
                account_id,
                amount,
                reason,
            } => {
                if !role.can_administer() {
                    return admin_required(request_id);
                }

                match issuer.refill(&account_id, amount, &reason).await {
                    Ok((balance, events)) => {
                        broadcast_core_events(ipc, events);
                        Response::success(
                            request_id,
                            ResponsePayload::Refilled {
                                account_id,
                                balance,
                            },
                        )
                    }
                    Err(e) => Response::error(request_id, store_error_info(&e)),
                }
            }

            Command::SetTier { account_id, tier } => {
                if !role.can_administer() {
                    return admin_required(request_id);
                }

                match issuer.set_tier(&account_id, tier).await {
                    Ok(events) => {
                        broadcast_core_events(ipc, events);
                        Response::success(request_id, ResponsePayload::TierSet { account_id, tier })
                    }
                    Err(e) => Response::error(request_id, store_error_info(&e)),
                }
            }

            Command::Deactivate { account_id } => {
                if !role.can_administer() {
                    return admin_required(request_id);
                }

                match issuer.deactivate(&account_id).await {
                    Ok(events) => {
                        broadcast_core_events(ipc, events);
                        Response::success(request_id, ResponsePayload::Deactivated { account_id })
                    }
                    Err(e) => Response::error(request_id, store_error_info(&e)),
                }
            }

            Command::ReloadCatalog => {
                if !role.can_administer() {
                    return admin_required(request_id);
                }

                match load_catalog(catalog_path) {
                    Ok(catalog) => {
                        let component_count = catalog.component_count();
                        let event = issuer.reload_catalog(catalog);
                        broadcast_core_events(ipc, vec![event]);
                        Response::success(
                            request_id,
                            ResponsePayload::CatalogReloaded { component_count },
                        )
                    }
                    Err(e) => {
                        warn!(error = %e, catalog_path = %catalog_path.display(), "Catalog reload failed");
                        Response::error(
                            request_id,
                            ErrorInfo::new(
                                ErrorCode::InternalError,
                                format!("catalog reload failed: {}", e),
                            ),
                        )
                    }
                }
            }
        }
    }
}

fn admin_required(request_id: u64) -> Response {
    Response::error(
        request_id,
        ErrorInfo::new(ErrorCode::PermissionDenied, "Admin role required"),
    )
}

fn broadcast_core_events(ipc: &IpcServer, events: Vec<CoreEvent>) {
    for event in events {
        ipc.broadcast_event(Event::new(core_event_payload(event)));
    }
}

fn core_event_payload(event: CoreEvent) -> EventPayload {
    match event {
        CoreEvent::SessionGranted {
            account_id,
            session,
        } => EventPayload::SessionGranted {
            account_id,
            session,
        },
        CoreEvent::BalanceChanged {
            account_id,
            balance,
            reason,
        } => EventPayload::BalanceChanged {
            account_id,
            balance,
            reason,
        },
        CoreEvent::TierChanged { account_id, tier } => {
            EventPayload::TierChanged { account_id, tier }
        }
        CoreEvent::AccountDeactivated { account_id } => {
            EventPayload::AccountDeactivated { account_id }
        }
        CoreEvent::SessionsExpired { count } => EventPayload::SessionsExpired { count },
        CoreEvent::CatalogReloaded { component_count } => {
            EventPayload::CatalogReloaded { component_count }
        }
    }
}

fn unlock_error_code(e: &UnlockError) -> ErrorCode {
    match e {
        UnlockError::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
        UnlockError::TierForbidden { .. } => ErrorCode::TierForbidden,
        UnlockError::Unauthenticated(_) => ErrorCode::Unauthenticated,
        UnlockError::UnknownAccount(_) => ErrorCode::UnknownAccount,
        UnlockError::UnknownComponent(_) => ErrorCode::UnknownComponent,
        UnlockError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
    }
}

fn unlock_error_info(e: &UnlockError) -> ErrorInfo {
    match e {
        UnlockError::InsufficientCredits {
            required,
            available,
        } => ErrorInfo::insufficient_credits(*required, *available),
        other => ErrorInfo::new(unlock_error_code(other), other.to_string()),
    }
}

fn store_error_info(e: &StoreError) -> ErrorInfo {
    match e {
        StoreError::NotFound(_) => ErrorInfo::new(ErrorCode::UnknownAccount, e.to_string()),
        StoreError::AlreadyExists(_) => ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
        StoreError::InsufficientCredits {
            required,
            available,
        } => ErrorInfo::insufficient_credits(*required, *available),
        other => ErrorInfo::new(ErrorCode::BackendUnavailable, other.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "turnstiled starting");

    // Create and run the service
    let service = Service::new(&args).await?;
    service.run().await
}
