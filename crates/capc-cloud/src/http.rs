//! Signed HTTP client for the CloudStack API
//!
//! Every call is a GET carrying `command`, `apiKey`, `response=json` and a
//! `signature`: the lowercased, key-sorted query string signed with
//! HMAC-SHA1 under the secret key and base64 encoded. Commands that run as
//! asynchronous jobs are polled through `queryAsyncJobResult`.
//!
//! Failures are classified here and only here. A lookup reports `NotFound`
//! when the list comes back empty or the API answers 431 with a "no match"
//! text; a create reports `AlreadyExists` when the
//! API answers 431 with an "already exists" text; a delete reports
//! `NotFound` when the target is gone. Every other answer is an `Api` error
//! carrying the CloudStack error code.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha1::Sha1;
use tracing::{debug, instrument};

use async_trait::async_trait;
use capc_common::crd::{NetworkType, ResourceIdentifier};
use capc_common::retry::{retry_with_backoff, RetryConfig};

use crate::client::CloudApi;
use crate::credentials::CloudCredentials;
use crate::error::CloudError;
use crate::path::OrgPath;
use crate::types::{
    AccountRecord, AffinityGroupRecord, ApiKeys, DeployVmRequest, DomainRecord, NetworkRecord,
    UserRecord, VmRecord, ZoneRecord,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);

/// CloudStack's "parameter error" code, used for collisions and misses
const PARAM_ERROR_CODE: u16 = 431;

/// Network offering used for isolated networks
pub const ISOLATED_NETWORK_OFFERING: &str = "DefaultIsolatedNetworkOfferingWithSourceNatService";

const JOB_PENDING: i64 = 0;
const JOB_SUCCEEDED: i64 = 1;

/// How an answer to a command is classified
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CallKind {
    Lookup,
    Create,
    Delete,
    Read,
}

/// One API command plus the identity it concerns
#[derive(Clone, Copy, Debug)]
struct Op<'a> {
    command: &'a str,
    kind: CallKind,
    resource: &'static str,
    name: &'a str,
}

impl<'a> Op<'a> {
    fn lookup(command: &'a str, resource: &'static str, name: &'a str) -> Self {
        Self {
            command,
            kind: CallKind::Lookup,
            resource,
            name,
        }
    }

    fn create(command: &'a str, resource: &'static str, name: &'a str) -> Self {
        Self {
            command,
            kind: CallKind::Create,
            resource,
            name,
        }
    }

    fn delete(command: &'a str, resource: &'static str, name: &'a str) -> Self {
        Self {
            command,
            kind: CallKind::Delete,
            resource,
            name,
        }
    }

    fn read(command: &'a str, resource: &'static str, name: &'a str) -> Self {
        Self {
            command,
            kind: CallKind::Read,
            resource,
            name,
        }
    }

    fn response_key(&self) -> String {
        format!("{}response", self.command.to_lowercase())
    }

    fn classify(&self, code: u16, text: String) -> CloudError {
        let lowered = text.to_lowercase();
        match self.kind {
            CallKind::Create if code == PARAM_ERROR_CODE && lowered.contains("already exists") => {
                CloudError::already_exists(self.resource, self.name)
            }
            CallKind::Lookup | CallKind::Delete
                if code == PARAM_ERROR_CODE && is_miss(&lowered) =>
            {
                CloudError::not_found(self.resource, self.name)
            }
            _ => CloudError::Api {
                command: self.command.to_string(),
                code,
                message: text,
            },
        }
    }

    fn transport(&self, message: impl std::fmt::Display) -> CloudError {
        CloudError::Transport {
            command: self.command.to_string(),
            message: message.to_string(),
        }
    }
}

fn is_miss(lowered: &str) -> bool {
    ["no match", "unable to find", "does not exist"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

type Params = Vec<(String, String)>;

fn param(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// The string CloudStack signs: pairs sorted by key, values URL-encoded,
/// everything lowercased
fn canonical_query(params: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (k.to_lowercase(), urlencoding::encode(v).to_lowercase()))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Base64 HMAC-SHA1 of the canonical query under `secret_key`
fn sign(params: &[(String, String)], secret_key: &str) -> Result<String, CloudError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret_key.as_bytes())
        .map_err(|e| CloudError::Credentials(format!("unusable secret key: {}", e)))?;
    mac.update(canonical_query(params).as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Deserialize)]
struct WireDomain {
    id: String,
    name: String,
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct WireAccount {
    id: String,
    name: String,
    #[serde(default)]
    domainid: String,
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
    username: String,
    #[serde(default)]
    account: String,
    #[serde(default)]
    domainid: String,
}

#[derive(Deserialize)]
struct WireKeys {
    #[serde(default)]
    apikey: Option<String>,
    #[serde(default)]
    secretkey: Option<String>,
}

#[derive(Deserialize)]
struct WireNamed {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct WireAffinityGroup {
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    type_: String,
}

#[derive(Deserialize)]
struct WireNetwork {
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    type_: String,
    #[serde(default)]
    zoneid: String,
}

#[derive(Deserialize)]
struct WireNic {
    #[serde(default)]
    ipaddress: Option<String>,
}

#[derive(Deserialize)]
struct WireVm {
    id: String,
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    nic: Vec<WireNic>,
}

impl From<WireNetwork> for NetworkRecord {
    fn from(n: WireNetwork) -> Self {
        Self {
            id: n.id,
            name: n.name,
            type_: if n.type_.eq_ignore_ascii_case("isolated") {
                NetworkType::Isolated
            } else {
                NetworkType::Shared
            },
            zone_id: n.zoneid,
        }
    }
}

impl From<WireVm> for VmRecord {
    fn from(vm: WireVm) -> Self {
        Self {
            id: vm.id,
            name: vm.name,
            state: vm.state,
            addresses: vm.nic.into_iter().filter_map(|n| n.ipaddress).collect(),
        }
    }
}

impl From<WireAffinityGroup> for AffinityGroupRecord {
    fn from(g: WireAffinityGroup) -> Self {
        Self {
            id: g.id,
            name: g.name,
            type_: g.type_,
        }
    }
}

fn decode<T: DeserializeOwned>(op: &Op<'_>, value: Value) -> Result<T, CloudError> {
    serde_json::from_value(value).map_err(|e| CloudError::Api {
        command: op.command.to_string(),
        code: 0,
        message: format!("unexpected response shape: {}", e),
    })
}

/// Items under `item` in a list response; absent means empty
fn items<T: DeserializeOwned>(op: &Op<'_>, body: &Value, item: &str) -> Result<Vec<T>, CloudError> {
    match body.get(item) {
        Some(list) => decode(op, list.clone()),
        None => Ok(Vec::new()),
    }
}

/// Single object under `item`
fn object<T: DeserializeOwned>(op: &Op<'_>, body: &Value, item: &str) -> Result<T, CloudError> {
    let value = body.get(item).cloned().ok_or_else(|| CloudError::Api {
        command: op.command.to_string(),
        code: 0,
        message: format!("response has no {}", item),
    })?;
    decode(op, value)
}

// =============================================================================
// Client
// =============================================================================

/// [`CloudApi`] over one CloudStack endpoint
#[derive(Clone)]
pub struct HttpCloudClient {
    credentials: CloudCredentials,
    http: reqwest::Client,
    retry: RetryConfig,
    job_poll_interval: Duration,
    job_timeout: Duration,
}

impl HttpCloudClient {
    /// Client for the endpoint and keys in `credentials`
    pub fn new(credentials: CloudCredentials) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!credentials.verify_ssl)
            .build()
            .map_err(|e| CloudError::InvalidInput(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            credentials,
            http,
            retry: RetryConfig::default(),
            job_poll_interval: DEFAULT_JOB_POLL_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        })
    }

    /// Override the retry policy for transient failures
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override async job polling
    pub fn with_job_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.job_poll_interval = interval;
        self.job_timeout = timeout;
        self
    }

    fn signed_url(&self, command: &str, params: &Params) -> Result<String, CloudError> {
        let mut all = params.clone();
        all.push(param("command", command));
        all.push(param("apiKey", self.credentials.api_key.clone()));
        all.push(param("response", "json"));
        let signature = sign(&all, &self.credentials.secret_key)?;

        let query = all
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .chain(std::iter::once(format!(
                "signature={}",
                urlencoding::encode(&signature)
            )))
            .collect::<Vec<_>>()
            .join("&");
        Ok(format!("{}?{}", self.credentials.api_url, query))
    }

    /// One signed request; returns the body under `<command>response`
    async fn send_once(&self, op: &Op<'_>, params: &Params) -> Result<Value, CloudError> {
        let url = self.signed_url(op.command, params)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| op.transport(e))?;
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            if status.is_success() {
                op.transport(format!("reading response: {}", e))
            } else {
                CloudError::Api {
                    command: op.command.to_string(),
                    code: status.as_u16(),
                    message: status.to_string(),
                }
            }
        })?;

        // Error bodies may come back under a different response key
        let inner = body
            .get(op.response_key())
            .or_else(|| body.as_object().and_then(|o| o.values().next()))
            .cloned()
            .unwrap_or(Value::Null);

        if !status.is_success() || inner.get("errorcode").is_some() {
            let code = inner
                .get("errorcode")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(status.as_u16());
            let text = inner
                .get("errortext")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            return Err(op.classify(code, text));
        }
        Ok(inner)
    }

    /// Signed request with retry of transient failures
    async fn call(&self, op: Op<'_>, params: Params) -> Result<Value, CloudError> {
        retry_with_backoff(&self.retry, op.command, CloudError::is_transient, || {
            self.send_once(&op, &params)
        })
        .await
    }

    /// Submit an asynchronous job and wait for its result
    async fn call_async(&self, op: Op<'_>, params: Params) -> Result<Value, CloudError> {
        let submitted = self.call(op, params).await?;
        let job_id = submitted
            .get("jobid")
            .and_then(Value::as_str)
            .ok_or_else(|| CloudError::Api {
                command: op.command.to_string(),
                code: 0,
                message: "async command returned no job ID".to_string(),
            })?
            .to_string();

        let poll = Op::read("queryAsyncJobResult", "job", &job_id);
        let deadline = tokio::time::Instant::now() + self.job_timeout;
        loop {
            let job = self
                .call(poll, vec![param("jobid", job_id.clone())])
                .await?;
            let status = job.get("jobstatus").and_then(Value::as_i64).unwrap_or(JOB_PENDING);
            if status == JOB_SUCCEEDED {
                return Ok(job.get("jobresult").cloned().unwrap_or(Value::Null));
            }
            if status != JOB_PENDING {
                let result = job.get("jobresult").cloned().unwrap_or(Value::Null);
                let code = result
                    .get("errorcode")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok())
                    .unwrap_or(0);
                let text = result
                    .get("errortext")
                    .and_then(Value::as_str)
                    .unwrap_or("async job failed")
                    .to_string();
                return Err(op.classify(code, text));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(op.transport(format!("timed out waiting for job {}", job_id)));
            }
            debug!(command = %op.command, job = %job_id, "job pending");
            tokio::time::sleep(self.job_poll_interval).await;
        }
    }

    /// First item of a list command, `NotFound` when empty
    async fn find_first<T: DeserializeOwned>(
        &self,
        op: Op<'_>,
        item: &str,
        params: Params,
    ) -> Result<T, CloudError> {
        let body = self.call(op, params).await?;
        items::<T>(&op, &body, item)?
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::not_found(op.resource, op.name))
    }

    /// ID of an offering or template, looked up by name unless given
    async fn resolve_id(
        &self,
        command: &str,
        resource: &'static str,
        item: &str,
        ident: &ResourceIdentifier,
        mut params: Params,
    ) -> Result<String, CloudError> {
        if !ident.id.is_empty() {
            return Ok(ident.id.clone());
        }
        params.push(param("name", ident.name.clone()));
        let found: WireNamed = self
            .find_first(Op::lookup(command, resource, &ident.name), item, params)
            .await?;
        Ok(found.id)
    }
}

#[async_trait]
impl CloudApi for HttpCloudClient {
    #[instrument(skip(self), fields(path = %path))]
    async fn find_domain_by_path(&self, path: &OrgPath) -> Result<DomainRecord, CloudError> {
        let wanted = path.to_string();
        let op = Op::lookup("listDomains", "domain", &wanted);
        let mut params = vec![param("name", path.name()), param("listall", "true")];
        if path.is_root() {
            params.push(param("level", "0"));
        }
        let body = self.call(op, params).await?;
        items::<WireDomain>(&op, &body, "domain")?
            .into_iter()
            .find(|d| OrgPath::parse(&d.path) == *path)
            .map(|d| DomainRecord {
                id: d.id,
                name: d.name,
                path: OrgPath::parse(&d.path).to_string(),
            })
            .ok_or_else(|| CloudError::not_found("domain", wanted.clone()))
    }

    async fn create_domain(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<DomainRecord, CloudError> {
        let op = Op::create("createDomain", "domain", name);
        let body = self
            .call(
                op,
                vec![param("name", name), param("parentdomainid", parent_id)],
            )
            .await?;
        let d: WireDomain = object(&op, &body, "domain")?;
        Ok(DomainRecord {
            id: d.id,
            name: d.name,
            path: OrgPath::parse(&d.path).to_string(),
        })
    }

    async fn find_account(&self, name: &str, domain_id: &str) -> Result<AccountRecord, CloudError> {
        let a: WireAccount = self
            .find_first(
                Op::lookup("listAccounts", "account", name),
                "account",
                vec![
                    param("name", name),
                    param("domainid", domain_id),
                    param("listall", "true"),
                ],
            )
            .await?;
        Ok(AccountRecord {
            id: a.id,
            name: a.name,
            domain_id: a.domainid,
        })
    }

    async fn create_account(
        &self,
        name: &str,
        domain_id: &str,
    ) -> Result<AccountRecord, CloudError> {
        let op = Op::create("createAccount", "account", name);
        // CloudStack creates the account together with an initial login
        let body = self
            .call(
                op,
                vec![
                    param("account", name),
                    param("domainid", domain_id),
                    param("username", name),
                    param("email", format!("{}@capc.local", name)),
                    param("firstname", name),
                    param("lastname", name),
                    param("password", random_password()),
                    param("accounttype", "0"),
                ],
            )
            .await?;
        let a: WireAccount = object(&op, &body, "account")?;
        Ok(AccountRecord {
            id: a.id,
            name: a.name,
            domain_id: a.domainid,
        })
    }

    async fn find_user(
        &self,
        username: &str,
        account: &str,
        domain_id: &str,
    ) -> Result<UserRecord, CloudError> {
        let u: WireUser = self
            .find_first(
                Op::lookup("listUsers", "user", username),
                "user",
                vec![
                    param("username", username),
                    param("account", account),
                    param("domainid", domain_id),
                    param("listall", "true"),
                ],
            )
            .await?;
        Ok(UserRecord {
            id: u.id,
            username: u.username,
            account: u.account,
            domain_id: u.domainid,
        })
    }

    async fn create_user(
        &self,
        username: &str,
        account: &str,
        domain_id: &str,
    ) -> Result<UserRecord, CloudError> {
        let op = Op::create("createUser", "user", username);
        let body = self
            .call(
                op,
                vec![
                    param("username", username),
                    param("account", account),
                    param("domainid", domain_id),
                    param("email", format!("{}@capc.local", username)),
                    param("firstname", username),
                    param("lastname", username),
                    param("password", random_password()),
                ],
            )
            .await?;
        let u: WireUser = object(&op, &body, "user")?;
        Ok(UserRecord {
            id: u.id,
            username: u.username,
            account: u.account,
            domain_id: u.domainid,
        })
    }

    async fn get_user_keys(&self, user_id: &str) -> Result<ApiKeys, CloudError> {
        let op = Op::read("getUserKeys", "user keys", user_id);
        let body = self.call(op, vec![param("id", user_id)]).await?;
        let keys: WireKeys = match body.get("userkeys") {
            Some(value) => decode(&op, value.clone())?,
            None => return Err(CloudError::not_found("user keys", user_id)),
        };
        match (keys.apikey, keys.secretkey) {
            (Some(api_key), Some(secret_key)) if !api_key.is_empty() => Ok(ApiKeys {
                api_key,
                secret_key,
            }),
            _ => Err(CloudError::not_found("user keys", user_id)),
        }
    }

    async fn register_user_keys(&self, user_id: &str) -> Result<ApiKeys, CloudError> {
        let op = Op::read("registerUserKeys", "user keys", user_id);
        let body = self.call(op, vec![param("id", user_id)]).await?;
        let keys: WireKeys = object(&op, &body, "userkeys")?;
        match (keys.apikey, keys.secretkey) {
            (Some(api_key), Some(secret_key)) => Ok(ApiKeys {
                api_key,
                secret_key,
            }),
            _ => Err(CloudError::Api {
                command: op.command.to_string(),
                code: 0,
                message: "no keys in response".to_string(),
            }),
        }
    }

    async fn find_zone(&self, name: &str) -> Result<ZoneRecord, CloudError> {
        let z: WireNamed = self
            .find_first(
                Op::lookup("listZones", "zone", name),
                "zone",
                vec![param("name", name)],
            )
            .await?;
        Ok(ZoneRecord {
            id: z.id,
            name: z.name,
        })
    }

    async fn find_affinity_group(&self, name: &str) -> Result<AffinityGroupRecord, CloudError> {
        let g: WireAffinityGroup = self
            .find_first(
                Op::lookup("listAffinityGroups", "affinity group", name),
                "affinitygroup",
                vec![param("name", name)],
            )
            .await?;
        Ok(g.into())
    }

    async fn create_affinity_group(
        &self,
        name: &str,
        group_type: &str,
    ) -> Result<AffinityGroupRecord, CloudError> {
        let op = Op::create("createAffinityGroup", "affinity group", name);
        let result = self
            .call_async(op, vec![param("name", name), param("type", group_type)])
            .await?;
        let g: WireAffinityGroup = object(&op, &result, "affinitygroup")?;
        Ok(g.into())
    }

    async fn delete_affinity_group(&self, id: &str) -> Result<(), CloudError> {
        let op = Op::delete("deleteAffinityGroup", "affinity group", id);
        self.call_async(op, vec![param("id", id)]).await?;
        Ok(())
    }

    async fn find_network(&self, name: &str, zone_id: &str) -> Result<NetworkRecord, CloudError> {
        let op = Op::lookup("listNetworks", "network", name);
        let body = self
            .call(
                op,
                vec![
                    param("keyword", name),
                    param("zoneid", zone_id),
                    param("listall", "true"),
                ],
            )
            .await?;
        // keyword is a substring match
        items::<WireNetwork>(&op, &body, "network")?
            .into_iter()
            .find(|n| n.name == name)
            .map(NetworkRecord::from)
            .ok_or_else(|| CloudError::not_found("network", name))
    }

    async fn create_isolated_network(
        &self,
        name: &str,
        zone_id: &str,
    ) -> Result<NetworkRecord, CloudError> {
        let offering_id = self
            .resolve_id(
                "listNetworkOfferings",
                "network offering",
                "networkoffering",
                &ResourceIdentifier::named(ISOLATED_NETWORK_OFFERING),
                Vec::new(),
            )
            .await?;
        let op = Op::create("createNetwork", "network", name);
        let body = self
            .call(
                op,
                vec![
                    param("name", name),
                    param("displaytext", name),
                    param("networkofferingid", offering_id),
                    param("zoneid", zone_id),
                ],
            )
            .await?;
        let n: WireNetwork = object(&op, &body, "network")?;
        Ok(n.into())
    }

    async fn find_vm(&self, name: &str) -> Result<VmRecord, CloudError> {
        let op = Op::lookup("listVirtualMachines", "virtual machine", name);
        let body = self
            .call(op, vec![param("name", name), param("listall", "true")])
            .await?;
        items::<WireVm>(&op, &body, "virtualmachine")?
            .into_iter()
            .find(|vm| vm.name == name)
            .map(VmRecord::from)
            .ok_or_else(|| CloudError::not_found("virtual machine", name))
    }

    #[instrument(skip(self, request), fields(instance = %request.name))]
    async fn deploy_vm(&self, request: &DeployVmRequest) -> Result<VmRecord, CloudError> {
        let offering_id = self
            .resolve_id(
                "listServiceOfferings",
                "service offering",
                "serviceoffering",
                &request.offering,
                Vec::new(),
            )
            .await?;
        let template_id = self
            .resolve_id(
                "listTemplates",
                "template",
                "template",
                &request.template,
                vec![
                    param("templatefilter", "executable"),
                    param("zoneid", request.zone_id.clone()),
                ],
            )
            .await?;

        let mut params = vec![
            param("name", request.name.clone()),
            param("displayname", request.name.clone()),
            param("zoneid", request.zone_id.clone()),
            param("serviceofferingid", offering_id),
            param("templateid", template_id),
        ];
        if !request.network_id.is_empty() {
            params.push(param("networkids", request.network_id.clone()));
        }
        if let Some(disk) = request.disk_offering.as_ref().filter(|d| !d.is_empty()) {
            let disk_id = self
                .resolve_id(
                    "listDiskOfferings",
                    "disk offering",
                    "diskoffering",
                    disk,
                    Vec::new(),
                )
                .await?;
            params.push(param("diskofferingid", disk_id));
            if let Some(size) = request.disk_size_gb {
                params.push(param("size", size.to_string()));
            }
        }
        if let Some(key) = &request.ssh_key {
            params.push(param("keypair", key.clone()));
        }
        if !request.affinity_group_ids.is_empty() {
            params.push(param("affinitygroupids", request.affinity_group_ids.join(",")));
        }
        if !request.user_data.is_empty() {
            params.push(param("userdata", request.user_data.clone()));
        }
        for (key, value) in &request.details {
            params.push((format!("details[0].{}", key), value.clone()));
        }

        let op = Op::create("deployVirtualMachine", "virtual machine", &request.name);
        let result = self.call_async(op, params).await?;
        let vm: WireVm = object(&op, &result, "virtualmachine")?;
        Ok(vm.into())
    }

    async fn destroy_vm(&self, id: &str) -> Result<(), CloudError> {
        let op = Op::delete("destroyVirtualMachine", "virtual machine", id);
        self.call_async(op, vec![param("id", id), param("expunge", "true")])
            .await?;
        Ok(())
    }
}

/// Throwaway login password; access goes through API keys only
fn random_password() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    #[derive(Default)]
    struct FakeEndpoint {
        zone_calls: AtomicUsize,
        job_polls: AtomicUsize,
    }

    async fn handle(
        State(state): State<Arc<FakeEndpoint>>,
        Query(q): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        assert!(q.contains_key("signature"));
        assert_eq!(q.get("apiKey").map(String::as_str), Some("ApiKey"));
        let command = q.get("command").cloned().unwrap_or_default();
        match command.as_str() {
            "listDomains" => (
                StatusCode::OK,
                Json(json!({ "listdomainsresponse": {} })),
            ),
            "createDomain" => (
                StatusCode::from_u16(431).unwrap(),
                Json(json!({ "createdomainresponse": {
                    "errorcode": 431,
                    "errortext": "Domain with name blah already exists for the parent"
                }})),
            ),
            "listZones" => {
                if state.zone_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    (
                        StatusCode::from_u16(530).unwrap(),
                        Json(json!({ "listzonesresponse": {
                            "errorcode": 530, "errortext": "internal error"
                        }})),
                    )
                } else {
                    (
                        StatusCode::OK,
                        Json(json!({ "listzonesresponse": {
                            "count": 1, "zone": [{ "id": "z1", "name": "Zone1" }]
                        }})),
                    )
                }
            }
            "listAccounts" => (
                StatusCode::from_u16(431).unwrap(),
                Json(json!({ "listaccountsresponse": {
                    "errorcode": 431, "errortext": "account already exists"
                }})),
            ),
            "listNetworks" => (
                StatusCode::from_u16(431).unwrap(),
                Json(json!({ "listnetworksresponse": {
                    "errorcode": 431, "errortext": "Unable to find network with name missing"
                }})),
            ),
            "createAffinityGroup" => (
                StatusCode::OK,
                Json(json!({ "createaffinitygroupresponse": { "jobid": "job-1" } })),
            ),
            "queryAsyncJobResult" => {
                if state.job_polls.fetch_add(1, Ordering::SeqCst) == 0 {
                    (
                        StatusCode::OK,
                        Json(json!({ "queryasyncjobresultresponse": { "jobstatus": 0 } })),
                    )
                } else {
                    (
                        StatusCode::OK,
                        Json(json!({ "queryasyncjobresultresponse": {
                            "jobstatus": 1,
                            "jobresult": { "affinitygroup": {
                                "id": "ag-1", "name": "fakeaffinitygroup", "type": "host anti-affinity"
                            }}
                        }})),
                    )
                }
            }
            _ => (
                StatusCode::from_u16(432).unwrap(),
                Json(json!({ "errorresponse": { "errorcode": 432, "errortext": "unknown command" } })),
            ),
        }
    }

    async fn spawn_endpoint() -> (String, Arc<FakeEndpoint>) {
        let state = Arc::new(FakeEndpoint::default());
        let app = Router::new()
            .route("/client/api", get(handle))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{}/client/api", addr), state)
    }

    fn client(api_url: String) -> HttpCloudClient {
        let creds = CloudCredentials {
            api_url,
            api_key: "ApiKey".to_string(),
            secret_key: "SecretKey".to_string(),
            verify_ssl: false,
        };
        HttpCloudClient::new(creds)
            .unwrap()
            .with_retry(RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..Default::default()
            })
            .with_job_polling(Duration::from_millis(1), Duration::from_secs(5))
    }

    // ==========================================================================
    // Request Signing
    // ==========================================================================

    #[test]
    fn canonical_query_sorts_and_lowercases() {
        let params = vec![
            param("command", "listZones"),
            param("apiKey", "AbC"),
            param("name", "Zone 1"),
        ];
        assert_eq!(
            canonical_query(&params),
            "apikey=abc&command=listzones&name=zone%201"
        );
    }

    #[test]
    fn signature_is_stable_base64_sha1() {
        let params = vec![param("command", "listZones"), param("apiKey", "ApiKey")];
        let a = sign(&params, "SecretKey").unwrap();
        let b = sign(&params, "SecretKey").unwrap();
        assert_eq!(a, b);
        // 20-byte digest
        assert_eq!(STANDARD.decode(&a).unwrap().len(), 20);
        assert_ne!(a, sign(&params, "OtherKey").unwrap());
    }

    // ==========================================================================
    // Story Tests: Failure Classification
    // ==========================================================================

    /// Story: an empty list answers a lookup with NotFound
    #[tokio::test]
    async fn story_empty_list_is_not_found() {
        let (url, _) = spawn_endpoint().await;
        let err = client(url)
            .find_domain_by_path(&OrgPath::parse("ROOT/blah"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    /// Story: a create collision is classified as AlreadyExists
    #[tokio::test]
    async fn story_create_collision_is_already_exists() {
        let (url, _) = spawn_endpoint().await;
        let err = client(url).create_domain("root", "blah").await.unwrap_err();
        assert!(err.is_already_exists());
    }

    /// Story: "already exists" text on a lookup is not a collision
    #[tokio::test]
    async fn story_collision_text_on_lookup_stays_api_error() {
        let (url, _) = spawn_endpoint().await;
        let err = client(url).find_account("a", "d").await.unwrap_err();
        assert!(matches!(err, CloudError::Api { code: 431, .. }));
    }

    /// Story: a lookup answered with a 431 miss is NotFound
    #[tokio::test]
    async fn story_lookup_miss_answer_is_not_found() {
        let (url, _) = spawn_endpoint().await;
        let err = client(url).find_network("missing", "z1").await.unwrap_err();
        assert!(err.is_not_found(), "{:?}", err);
    }

    /// Story: a 5xx is retried before it reaches the broker
    #[tokio::test]
    async fn story_transient_failure_is_retried() {
        let (url, state) = spawn_endpoint().await;
        let zone = client(url).find_zone("Zone1").await.unwrap();
        assert_eq!(zone.id, "z1");
        assert_eq!(state.zone_calls.load(Ordering::SeqCst), 2);
    }

    /// Story: async commands are polled until the job completes
    #[tokio::test]
    async fn story_async_job_is_polled() {
        let (url, state) = spawn_endpoint().await;
        let group = client(url)
            .create_affinity_group("fakeaffinitygroup", "host anti-affinity")
            .await
            .unwrap();
        assert_eq!(group.id, "ag-1");
        assert_eq!(state.job_polls.load(Ordering::SeqCst), 2);
    }
}
