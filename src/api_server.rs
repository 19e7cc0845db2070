use crate::api_dto::EmailList;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::Store;
use actix_web::dev::{Server, ServerHandle};
use actix_web::http::header::ContentType;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::web::{self, Data};
use actix_web::{guard, rt, App, HttpResponse, HttpServer};
use log::{error, info};
use serde::Serialize;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::{mpsc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

async fn list_emails(store: web::Data<Store>) -> HttpResponse {
    json(&EmailList::new(store.list_all()))
}

async fn get_email(id: web::Path<String>, store: web::Data<Store>) -> HttpResponse {
    match store.get(&id) {
        Some(email) => json(&email),
        None => not_found("Email not found"),
    }
}

async fn missing_id() -> HttpResponse {
    not_found("Email ID is required")
}

async fn clear_emails(store: web::Data<Store>) -> HttpResponse {
    store.clear_all();
    HttpResponse::NoContent().finish()
}

async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

async fn unknown_route() -> HttpResponse {
    not_found("404 page not found")
}

fn not_found(message: &'static str) -> HttpResponse {
    HttpResponse::NotFound()
        .content_type(ContentType::plaintext())
        .body(message)
}

fn json<T: Serialize>(value: &T) -> HttpResponse {
    match serde_json::to_string(value) {
        Ok(body) => HttpResponse::Ok()
            .content_type(ContentType::json())
            .body(body),
        Err(e) => {
            error!("failed to encode response: {}", e);
            HttpResponse::InternalServerError()
                .content_type(ContentType::plaintext())
                .body("Failed to encode response")
        }
    }
}

/// Lets browser UIs on any origin use the API.
pub(crate) fn cors() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type"))
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/{tail:.*}")
            .guard(guard::Options())
            .to(preflight),
    )
    .route("/api/v1/emails", web::get().to(list_emails))
    .route("/api/v1/emails", web::delete().to(clear_emails))
    .route("/api/v1/emails/", web::get().to(missing_id))
    .route("/api/v1/emails/{id}", web::get().to(get_email))
    .default_service(web::to(unknown_route));
}

/// Bind the HTTP listener without serving yet.
pub(crate) fn bind(config: &Config) -> io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::new(config.host, config.http_port))
}

fn build(listener: TcpListener, config: &HttpSettings, store: Store) -> io::Result<Server> {
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors())
            .app_data(Data::new(store.clone()))
            .configure(routes)
    })
    .workers(config.workers)
    .shutdown_timeout(config.shutdown_timeout)
    .disable_signals()
    .listen(listener)?;
    Ok(server.run())
}

struct HttpSettings {
    workers: usize,
    shutdown_timeout: u64,
}

/// The HTTP query API, served by actix-web on its own thread.
pub(crate) struct HttpApi {
    addr: SocketAddr,
    handle: ServerHandle,
    thread: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl HttpApi {
    /// Serve the API on an already bound `listener`.
    pub fn serve(listener: TcpListener, store: Store, config: &Config) -> Result<HttpApi> {
        let addr = listener.local_addr()?;
        let settings = HttpSettings {
            workers: config.http_workers,
            shutdown_timeout: config.http_shutdown_timeout.as_secs(),
        };
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("http-api".to_string())
            .spawn(move || {
                rt::System::new().block_on(async move {
                    match build(listener, &settings, store) {
                        Ok(server) => {
                            let _ = tx.send(Ok(server.handle()));
                            server.await
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            Ok(())
                        }
                    }
                })
            })?;

        match rx.recv() {
            Ok(Ok(handle)) => {
                info!("HTTP API listening on {}", addr);
                Ok(HttpApi {
                    addr,
                    handle,
                    thread: Mutex::new(Some(thread)),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(Error::Io(e))
            }
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "HTTP server thread exited before serving",
            ))),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and wait up to `timeout` for in-flight ones.
    ///
    /// The listener is released right away. Requests still running at the
    /// deadline are left to the workers, which drop them once the configured
    /// shutdown timeout runs out.
    /// Must not be called from inside an async runtime.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(thread) = thread else {
            return Ok(());
        };

        let handle = self.handle.clone();
        let finished = rt::System::new().block_on(async move {
            rt::time::timeout(timeout, handle.stop(true)).await.is_ok()
        });
        if !finished {
            error!(
                "HTTP API on {} still busy after {:?}, leaving it to wind down",
                self.addr, timeout
            );
            return Err(Error::ShutdownTimeout(timeout));
        }

        match thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP server exited with error: {}", e),
            Err(_) => error!("HTTP server thread panicked"),
        }
        info!("HTTP API on {} stopped", self.addr);
        Ok(())
    }
}
