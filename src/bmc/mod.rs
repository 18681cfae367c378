//! Uniform contract over the two BMC back-ends (§4.1). Dispatch is by
//! enum variant rather than an inheritance hierarchy (§9).

pub mod ipmi;
pub mod redfish;

use std::future::Future;

use crate::error::BmcError;

pub use ipmi::IpmiBmc;
pub use redfish::RedfishBmc;

/// The kind of BMC an endpoint was constructed for. Carried on
/// `system_info` rows as `bmc_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BmcKind {
    Ipmi,
    Redfish,
}

impl BmcKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BmcKind::Ipmi => "ipmi",
            BmcKind::Redfish => "redfish",
        }
    }
}

/// The operations every BMC back-end exposes (§4.1). "Property" reads
/// that perform I/O in the original are plain async operations here,
/// per §9 — no getters hiding network/subprocess calls.
///
/// Methods are spelled as `-> impl Future<...> + Send` rather than bare
/// `async fn` so the futures they return are provably `Send`: the
/// collector and runner each `tokio::spawn` work generic over `B:
/// BmcDriver`, and a native-AFIT `async fn` carries no `Send` bound in a
/// generic context, which `tokio::spawn`'s multi-thread runtime requires.
pub trait BmcDriver {
    fn connect(&mut self) -> impl Future<Output = Result<(), BmcError>> + Send;
    fn disconnect(&mut self) -> impl Future<Output = Result<(), BmcError>> + Send;
    fn current_power(&self) -> impl Future<Output = Result<i64, BmcError>> + Send;
    fn current_cap_level(&self) -> impl Future<Output = Result<Option<i64>, BmcError>> + Send;
    fn set_cap_level(&self, watts: i64) -> impl Future<Output = Result<(), BmcError>> + Send;
    fn activate_capping(&self) -> impl Future<Output = Result<(), BmcError>> + Send;
    fn deactivate_capping(&self) -> impl Future<Output = Result<(), BmcError>> + Send;
}

/// One endpoint object per task (§5 "Parallel tasks on the controller"):
/// the collector and the runner each construct their own `BmcEndpoint`
/// against the same host rather than sharing one across tasks.
pub enum BmcEndpoint {
    Ipmi(IpmiBmc),
    Redfish(RedfishBmc),
}

impl BmcEndpoint {
    pub fn new_ipmi(hostname: String, username: String, password: String, ipmitool_path: String) -> Self {
        BmcEndpoint::Ipmi(IpmiBmc::new(hostname, username, password, ipmitool_path))
    }

    pub fn new_redfish(hostname: String, username: String, password: String) -> Self {
        BmcEndpoint::Redfish(RedfishBmc::new(hostname, username, password))
    }

    pub fn kind(&self) -> BmcKind {
        match self {
            BmcEndpoint::Ipmi(_) => BmcKind::Ipmi,
            BmcEndpoint::Redfish(_) => BmcKind::Redfish,
        }
    }
}

impl BmcDriver for BmcEndpoint {
    async fn connect(&mut self) -> Result<(), BmcError> {
        match self {
            BmcEndpoint::Ipmi(b) => b.connect().await,
            BmcEndpoint::Redfish(b) => b.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), BmcError> {
        match self {
            BmcEndpoint::Ipmi(b) => b.disconnect().await,
            BmcEndpoint::Redfish(b) => b.disconnect().await,
        }
    }

    async fn current_power(&self) -> Result<i64, BmcError> {
        match self {
            BmcEndpoint::Ipmi(b) => b.current_power().await,
            BmcEndpoint::Redfish(b) => b.current_power().await,
        }
    }

    async fn current_cap_level(&self) -> Result<Option<i64>, BmcError> {
        match self {
            BmcEndpoint::Ipmi(b) => b.current_cap_level().await,
            BmcEndpoint::Redfish(b) => b.current_cap_level().await,
        }
    }

    async fn set_cap_level(&self, watts: i64) -> Result<(), BmcError> {
        match self {
            BmcEndpoint::Ipmi(b) => b.set_cap_level(watts).await,
            BmcEndpoint::Redfish(b) => b.set_cap_level(watts).await,
        }
    }

    async fn activate_capping(&self) -> Result<(), BmcError> {
        match self {
            BmcEndpoint::Ipmi(b) => b.activate_capping().await,
            BmcEndpoint::Redfish(b) => b.activate_capping().await,
        }
    }

    async fn deactivate_capping(&self) -> Result<(), BmcError> {
        match self {
            BmcEndpoint::Ipmi(b) => b.deactivate_capping().await,
            BmcEndpoint::Redfish(b) => b.deactivate_capping().await,
        }
    }
}
