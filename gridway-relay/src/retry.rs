//! Timed retry and failover redirection for server-bound requests.
//!
//! [`Relay::issue_with_retry`] is the fire-and-forget entry point for
//! commands addressed to another server by name. Transient failures
//! (resolver temporarily unavailable, peer unreachable) are retried on a
//! fixed backoff until a ceiling elapses; permanent failures (unknown
//! host, encode failure) terminate immediately. Either way the caller's
//! callback fires exactly once.
//!
//! One logical request never accumulates extra tracking records: each
//! retry attempt is a fresh dispatch of the same command, and a record is
//! created only when an attempt actually posts bytes (or when the request
//! fails terminally and is surfaced through the registry).

use std::rc::{Rc, Weak};

use gridway_core::{HostResolver, PayloadCodec, Providers, TaskProvider, TimeProvider};

use crate::command::Command;
use crate::registry::ReplyCallback;
use crate::relay::{Relay, Target};
use crate::reply::FailReason;

/// Failover redirect policy.
///
/// When this server is the active secondary of a failover pair, requests
/// addressed to the (currently inactive) primary are redirected to this
/// server's own identity.
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Whether this process is the active secondary.
    pub active_secondary: bool,
    /// Host name of the primary server.
    pub primary_host: String,
    /// This server's own host name.
    pub local_host: String,
}

impl FailoverConfig {
    /// Apply the redirect to a destination host name.
    ///
    /// The match is case-insensitive and accepts either the full primary
    /// name or its unqualified prefix (boundary at a dot).
    pub fn redirect<'a>(&'a self, host: &'a str) -> &'a str {
        if !self.active_secondary {
            return host;
        }
        let len = host.len();
        if len == 0 || len > self.primary_host.len() {
            return host;
        }
        let prefix_matches = self.primary_host[..len].eq_ignore_ascii_case(host);
        let at_boundary =
            self.primary_host.len() == len || self.primary_host.as_bytes()[len] == b'.';
        if prefix_matches && at_boundary {
            &self.local_host
        } else {
            host
        }
    }
}

/// Split a `host[:port]` destination name.
fn split_host_port(name: &str, default_port: u16) -> (String, u16) {
    match name.rsplit_once(':') {
        Some((host, port_str)) => match port_str.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (name.to_string(), default_port),
        },
        None => (name.to_string(), default_port),
    }
}

enum Attempt {
    /// Dispatched; the tracking record owns the request now.
    Issued,
    /// Terminal failure; the callback has fired.
    Terminal,
    /// Transient failure; ownership returns for the next attempt.
    Transient(Command, ReplyCallback),
}

impl<P: Providers, C: PayloadCodec> Relay<P, C> {
    /// Issue a command to a server by name, retrying transient failures.
    ///
    /// Fire-and-forget: completion (success or terminal failure) always
    /// eventually reaches `callback`, exactly once.
    pub fn issue_with_retry(self: &Rc<Self>, server_name: &str, command: Command, callback: ReplyCallback) {
        let relay = Rc::downgrade(self);
        let name = server_name.to_string();
        let _ = self
            .providers()
            .task()
            .spawn("retry_task", retry_task(relay, name, command, callback));
    }
}

async fn retry_task<P: Providers, C: PayloadCodec>(
    relay: Weak<Relay<P, C>>,
    name: String,
    command: Command,
    callback: ReplyCallback,
) {
    let (time, backoff, ceiling) = match relay.upgrade() {
        Some(r) => (
            r.providers().time().clone(),
            r.config().retry_backoff,
            r.config().retry_ceiling,
        ),
        None => return,
    };
    let started = time.now();

    let mut command = command;
    let mut callback = callback;
    loop {
        let r = match relay.upgrade() {
            Some(r) => r,
            None => return,
        };

        match attempt_once(&r, &name, command, callback).await {
            Attempt::Issued | Attempt::Terminal => return,
            Attempt::Transient(cmd, cb) => {
                command = cmd;
                callback = cb;
            }
        }
        drop(r);

        time.sleep(backoff).await;

        if time.now().saturating_sub(started) >= ceiling {
            if let Some(r) = relay.upgrade() {
                tracing::warn!(server = %name, "retry ceiling reached, failing request");
                r.fail_unrouted(
                    command,
                    callback,
                    FailReason::Timeout,
                    &crate::error::RelayError::RetryExhausted,
                );
            }
            return;
        }
    }
}

async fn attempt_once<P: Providers, C: PayloadCodec>(
    relay: &Rc<Relay<P, C>>,
    name: &str,
    command: Command,
    callback: ReplyCallback,
) -> Attempt {
    let (host, port) = split_host_port(name, relay.config().default_port);
    let host = relay.redirect_host(&host);

    let address = match relay.providers().resolver().resolve(&host, port) {
        Ok(address) => address,
        Err(e) if e.is_retryable() => {
            tracing::debug!(server = %name, error = %e, "resolution failed, will retry");
            return Attempt::Transient(command, callback);
        }
        Err(e) => {
            relay.fail_unrouted(
                command,
                callback,
                FailReason::Rejected,
                &crate::error::RelayError::Resolve(e),
            );
            return Attempt::Terminal;
        }
    };

    let conn = match relay.connect_server(&address).await {
        Ok(conn) => conn,
        Err(e) if e.is_retryable() => {
            tracing::debug!(server = %name, error = %e, "connect failed, will retry");
            return Attempt::Transient(command, callback);
        }
        Err(e) => {
            relay.fail_unrouted(command, callback, FailReason::Rejected, &e);
            return Attempt::Terminal;
        }
    };

    let job = command.job_id();
    match relay.issue(Target::Conn(conn), command, job, callback).await {
        Ok(_) => Attempt::Issued,
        Err(rejected) => {
            // Encode and send failures on a valid connection are not
            // retried here; the connect-level failures above are the only
            // retryable class.
            relay.close_conn(conn);
            relay.fail_unrouted(
                rejected.command,
                rejected.callback,
                FailReason::Rejected,
                &rejected.error,
            );
            Attempt::Terminal
        }
    }
}
