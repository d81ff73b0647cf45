//! Command handlers for the sockrt CLI

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use sockrt_runtime::{ChannelHost, Runtime, RuntimeBuilder, SchemeResponse};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "OPTIONS"];

// ----------------------------------------------------------------------------
// Request Lines
// ----------------------------------------------------------------------------

/// One line of `serve` input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A bare URI posted as a script message
    Message { uri: String },
    /// `<METHOD> <uri>`, answered as an intercepted scheme request
    Scheme { method: String, uri: String },
}

impl Request {
    /// Parse a request line; blank lines and `#` comments yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if let Some((method, uri)) = line.split_once(char::is_whitespace) {
            let method = method.to_ascii_uppercase();
            if HTTP_METHODS.contains(&method.as_str()) {
                return Some(Request::Scheme {
                    method,
                    uri: uri.trim().to_string(),
                });
            }
        }

        Some(Request::Message {
            uri: line.to_string(),
        })
    }
}

/// Render a scheme response as a status line plus the body text
pub fn format_response(response: &SchemeResponse) -> String {
    let body = String::from_utf8_lossy(&response.body);
    if body.is_empty() {
        response.status.to_string()
    } else {
        format!("{} {}", response.status, body)
    }
}

// ----------------------------------------------------------------------------
// Command Dispatcher
// ----------------------------------------------------------------------------

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Serve => Self::handle_serve_command(config).await,
            Commands::Invoke {
                uri,
                body_file,
                timeout_ms,
            } => Self::handle_invoke_command(config, uri, body_file, timeout_ms).await,
            Commands::Config => Self::handle_config_command(config),
        }
    }

    /// Build and start a runtime whose scripts land in the returned receiver
    pub fn start_runtime(config: &AppConfig) -> Result<(Runtime, UnboundedReceiver<String>)> {
        let (host, scripts) = ChannelHost::new();
        let runtime = RuntimeBuilder::new()
            .with_config(config.runtime.clone())
            .with_host(std::sync::Arc::new(host))
            .build_and_start()?;
        Ok((runtime, scripts))
    }

    /// Feed every request line from `reader` into `runtime`
    ///
    /// Returns how many lines were routed. Scheme responses are written to
    /// stdout as they arrive.
    pub async fn serve<R>(runtime: &Runtime, reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut routed = 0;

        while let Some(line) = lines.next_line().await? {
            let Some(request) = Request::parse(&line) else {
                continue;
            };

            match request {
                Request::Message { uri } => {
                    if !runtime.handle_message(&uri, None) {
                        warn!("No handler for {}", uri);
                    }
                }
                Request::Scheme { method, uri } => {
                    runtime.handle_scheme_request(&method, &uri, None, |response| {
                        println!("{}", format_response(&response));
                    });
                }
            }
            routed += 1;
        }

        Ok(routed)
    }

    /// Route one request and wait for the first script it produces
    pub async fn invoke(
        runtime: &Runtime,
        scripts: &mut UnboundedReceiver<String>,
        uri: &str,
        body: Option<Vec<u8>>,
        wait: Duration,
    ) -> Result<String> {
        if !runtime.handle_message(uri, body) {
            warn!("No handler for {}", uri);
        }

        match tokio::time::timeout(wait, scripts.recv()).await {
            Ok(Some(script)) => Ok(script),
            Ok(None) => Err(CliError::Request("runtime host went away".to_string())),
            Err(_) => Err(CliError::Request(format!(
                "no reply to {} within {}ms",
                uri,
                wait.as_millis()
            ))),
        }
    }

    /// Handle the serve command
    async fn handle_serve_command(config: AppConfig) -> Result<()> {
        let (runtime, mut scripts) = Self::start_runtime(&config)?;
        info!("Serving requests from stdin; close stdin to stop");

        let print_scripts = config.cli.print_scripts;
        let printer = tokio::spawn(async move {
            while let Some(script) = scripts.recv().await {
                if print_scripts {
                    println!("{}", script);
                }
            }
        });

        let routed = Self::serve(&runtime, BufReader::new(tokio::io::stdin())).await?;
        debug!("Routed {} requests", routed);

        // let replies still in flight reach the printer before the host goes away
        tokio::time::sleep(config.runtime.data.fetch_grace()).await;
        drop(runtime);
        if tokio::time::timeout(Duration::from_millis(250), printer).await.is_err() {
            debug!("Script printer still held open after shutdown");
        }
        Ok(())
    }

    /// Handle the invoke command
    async fn handle_invoke_command(
        config: AppConfig,
        uri: String,
        body_file: Option<String>,
        timeout_ms: u64,
    ) -> Result<()> {
        let body = match body_file {
            Some(path) => Some(tokio::fs::read(&path).await?),
            None => None,
        };

        let (runtime, mut scripts) = Self::start_runtime(&config)?;
        let script = Self::invoke(
            &runtime,
            &mut scripts,
            &uri,
            body,
            Duration::from_millis(timeout_ms),
        )
        .await?;
        println!("{}", script);

        runtime.shutdown();
        Ok(())
    }

    /// Handle the config command
    fn handle_config_command(config: AppConfig) -> Result<()> {
        print!("{}", config.to_toml()?);
        Ok(())
    }
}
