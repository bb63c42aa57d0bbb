//! SafeDialer / SafeHttpClient: pre-connect SSRF policy enforcement shared
//! by every network-facing upstream driver (spec §4.4).
//!
//! The policy is snapshotted once at construction time from the process
//! environment (`DialPolicy::from_env`); a running dialer never re-reads
//! the environment mid-flight, so toggling an env var after startup has no
//! effect on a dialer that already exists. This mirrors the reference
//! gateway's practice of resolving environment-derived policy once at
//! startup rather than on every call.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ipnet::{Ipv4Net, Ipv6Net};
use thiserror::Error;
use tokio::net::{lookup_host, TcpStream};

use crate::error::PolicyError;

const LOOPBACK_HINT: &str = "MCPANY_ALLOW_LOOPBACK_RESOURCES=true";
const PRIVATE_NETWORK_HINT: &str = "MCPANY_ALLOW_PRIVATE_NETWORK_RESOURCES=true";

#[derive(Error, Debug)]
pub enum DialerError {
	#[error(transparent)]
	Policy(#[from] PolicyError),

	#[error("dns resolution failed for '{0}': {1}")]
	Resolution(String, String),

	#[error("no addresses resolved for '{0}'")]
	NoAddresses(String),

	#[error("connection to {0} failed: {1}")]
	Connect(String, String),
}

/// SSRF destination policy, resolved once from the environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialPolicy {
	allow_loopback: bool,
	allow_private_network: bool,
}

impl DialPolicy {
	/// Reads `MCPANY_ALLOW_LOOPBACK_RESOURCES`, `MCPANY_ALLOW_PRIVATE_NETWORK_RESOURCES`,
	/// and `MCPANY_DANGEROUS_ALLOW_LOCAL_IPS` (which implies both of the above).
	pub fn from_env() -> Self {
		let dangerous = env_flag("MCPANY_DANGEROUS_ALLOW_LOCAL_IPS");
		Self {
			allow_loopback: dangerous || env_flag("MCPANY_ALLOW_LOOPBACK_RESOURCES"),
			allow_private_network: dangerous || env_flag("MCPANY_ALLOW_PRIVATE_NETWORK_RESOURCES"),
		}
	}

	/// The default-refuse-everything policy, for tests and explicit opt-out.
	pub fn refuse_all() -> Self {
		Self {
			allow_loopback: false,
			allow_private_network: false,
		}
	}

	/// Checks a single resolved address against policy. Returns the
	/// SSRF-blocked [`PolicyError`] (with the matching remediation hint) if
	/// this destination is not currently permitted.
	pub fn check(&self, addr: IpAddr) -> Result<(), PolicyError> {
		match classify(addr) {
			Classification::Public => Ok(()),
			Classification::Loopback if self.allow_loopback => Ok(()),
			Classification::Loopback => Err(PolicyError::ssrf_blocked(addr, LOOPBACK_HINT)),
			Classification::Private if self.allow_private_network => Ok(()),
			Classification::Private => Err(PolicyError::ssrf_blocked(addr, PRIVATE_NETWORK_HINT)),
		}
	}
}

fn env_flag(name: &str) -> bool {
	std::env::var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1").unwrap_or(false)
}

enum Classification {
	Public,
	Loopback,
	Private,
}

/// RFC1918 + link-local (RFC3927) ranges, matched via `ipnet`'s `Ipv4Net`/
/// `Ipv6Net::contains` rather than hand-rolled octet arithmetic.
fn private_v4_nets() -> &'static [Ipv4Net] {
	static NETS: OnceLock<Vec<Ipv4Net>> = OnceLock::new();
	NETS.get_or_init(|| {
		["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "169.254.0.0/16"]
			.iter()
			.map(|s| s.parse().expect("static cidr literal is valid"))
			.collect()
	})
}

fn private_v6_nets() -> &'static [Ipv6Net] {
	static NETS: OnceLock<Vec<Ipv6Net>> = OnceLock::new();
	NETS.get_or_init(|| {
		// fc00::/7 (unique local), fe80::/10 (link-local).
		["fc00::/7", "fe80::/10"].iter().map(|s| s.parse().expect("static cidr literal is valid")).collect()
	})
}

fn classify(addr: IpAddr) -> Classification {
	match addr {
		IpAddr::V4(v4) => classify_v4(v4),
		IpAddr::V6(v6) => classify_v6(v6),
	}
}

fn classify_v4(addr: Ipv4Addr) -> Classification {
	if addr.is_loopback() {
		return Classification::Loopback;
	}
	if private_v4_nets().iter().any(|net| net.contains(&addr)) || addr.is_multicast() {
		return Classification::Private;
	}
	Classification::Public
}

fn classify_v6(addr: Ipv6Addr) -> Classification {
	if addr.is_loopback() {
		return Classification::Loopback;
	}
	if let Some(v4) = addr.to_ipv4_mapped() {
		return classify_v4(v4);
	}
	if private_v6_nets().iter().any(|net| net.contains(&addr)) || addr.is_multicast() {
		return Classification::Private;
	}
	Classification::Public
}

/// SSRF-checked TCP dialer. DNS-resolves `host:port`, rejects any resolved
/// address that the policy disallows, and connects to the first permitted
/// address.
#[derive(Debug, Clone)]
pub struct SafeDialer {
	policy: DialPolicy,
}

impl SafeDialer {
	pub fn new(policy: DialPolicy) -> Self {
		Self { policy }
	}

	pub fn from_env() -> Self {
		Self::new(DialPolicy::from_env())
	}

	pub fn policy(&self) -> DialPolicy {
		self.policy
	}

	/// Resolves `host:port` and checks every candidate against policy
	/// without opening a socket, for callers (WebSocket, WebRTC signaling)
	/// that delegate the actual connection to another crate but still need
	/// the same SSRF enforcement applied first.
	pub async fn check_destination(&self, host: &str, port: u16) -> Result<(), DialerError> {
		let target = format!("{host}:{port}");
		let addrs: Vec<SocketAddr> = lookup_host(&target)
			.await
			.map_err(|e| DialerError::Resolution(target.clone(), e.to_string()))?
			.collect();

		if addrs.is_empty() {
			return Err(DialerError::NoAddresses(target));
		}

		let mut last_err = None;
		for addr in &addrs {
			match self.policy.check(addr.ip()) {
				Ok(()) => return Ok(()),
				Err(e) => last_err = Some(DialerError::Policy(e)),
			}
		}

		Err(last_err.unwrap_or_else(|| DialerError::NoAddresses(target)))
	}

	/// Resolves and connects to `host:port`, applying SSRF policy to every
	/// candidate address before dialing it.
	pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, DialerError> {
		let target = format!("{host}:{port}");
		let addrs: Vec<SocketAddr> = lookup_host(&target)
			.await
			.map_err(|e| DialerError::Resolution(target.clone(), e.to_string()))?
			.collect();

		if addrs.is_empty() {
			return Err(DialerError::NoAddresses(target));
		}

		let mut last_err = None;
		for addr in &addrs {
			if let Err(policy_err) = self.policy.check(addr.ip()) {
				last_err = Some(DialerError::Policy(policy_err));
				continue;
			}
			match TcpStream::connect(addr).await {
				Ok(stream) => {
					apply_keepalive(&stream);
					return Ok(stream);
				},
				Err(e) => last_err = Some(DialerError::Connect(addr.to_string(), e.to_string())),
			}
		}

		Err(last_err.unwrap_or_else(|| DialerError::NoAddresses(target)))
	}
}

/// Enables TCP keepalive on a freshly connected stream so a silently
/// dropped upstream (NAT timeout, dead peer) surfaces as a connection error
/// instead of a hang. Best-effort: failure to set it is not fatal to the
/// call that's about to use the connection.
fn apply_keepalive(stream: &TcpStream) {
	let sock_ref = socket2::SockRef::from(stream);
	let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(60));
	if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
		tracing::debug!(target: "mcpany::net", error = %e, "failed to set tcp keepalive");
	}
}

/// A `reqwest::dns::Resolve` implementation that rejects policy-denied
/// addresses before `reqwest` ever opens a socket to them, so the SSRF
/// check applies uniformly whether a caller uses [`SafeDialer`] directly or
/// goes through [`SafeHttpClient`].
#[derive(Debug, Clone)]
struct PolicyResolver {
	policy: DialPolicy,
}

impl reqwest::dns::Resolve for PolicyResolver {
	fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
		let policy = self.policy;
		Box::pin(async move {
			let host = name.as_str().to_string();
			let addrs: Vec<SocketAddr> = lookup_host((host.as_str(), 0))
				.await
				.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?
				.collect();

			let mut permitted = Vec::new();
			let mut denial = None;
			for addr in addrs {
				match policy.check(addr.ip()) {
					Ok(()) => permitted.push(addr),
					Err(e) => denial = Some(e),
				}
			}

			if permitted.is_empty() {
				if let Some(e) = denial {
					return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>);
				}
				return Err(Box::<dyn std::error::Error + Send + Sync>::from(format!(
					"no addresses resolved for '{host}'"
				)));
			}

			let iter: reqwest::dns::Addrs = Box::new(permitted.into_iter());
			Ok(iter)
		})
	}
}

/// `reqwest::Client` wrapper that routes all DNS resolution through the
/// SSRF policy. The same [`DialPolicy`] backs both this and [`SafeDialer`]
/// (spec §4.4: "the same dialer backs both HTTP and WebSocket transports").
#[derive(Debug, Clone)]
pub struct SafeHttpClient {
	client: reqwest::Client,
}

impl SafeHttpClient {
	pub fn new(policy: DialPolicy) -> Result<Self, reqwest::Error> {
		let client = reqwest::Client::builder()
			.dns_resolver(Arc::new(PolicyResolver { policy }))
			.build()?;
		Ok(Self { client })
	}

	pub fn from_env() -> Result<Self, reqwest::Error> {
		Self::new(DialPolicy::from_env())
	}

	pub fn inner(&self) -> &reqwest::Client {
		&self.client
	}
}
