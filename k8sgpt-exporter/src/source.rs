//! Record sources: where each poll's diagnostic records come from.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use k8sgpt_common::Record;

use crate::config::{SourceConfig, SourceKind};

/// Errors that abort a single poll cycle.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be reached.
    #[error("Failed to fetch records: {0}")]
    Fetch(String),

    /// The source answered with something that is not a record list.
    #[error("Failed to decode records: {0}")]
    Decode(String),
}

impl From<kube::Error> for SourceError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::SerdeError(e) => Self::Decode(e.to_string()),
            other => Self::Fetch(other.to_string()),
        }
    }
}

/// A producer of diagnostic records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the current set of records.
    async fn fetch(&self) -> Result<Vec<Record>, SourceError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Shareable source handle.
pub type SharedSource = Arc<dyn RecordSource>;

/// Build the source selected by the configuration.
pub fn build_source(config: &SourceConfig) -> SharedSource {
    let source: SharedSource = match config.kind {
        SourceKind::Api => Arc::new(KubeSource::new(config)),
        SourceKind::Kubectl => Arc::new(KubectlSource::new(config)),
    };

    info!(source = %source.describe(), "Record source ready");
    source
}

/// Lists the K8sGPT custom resources through the Kubernetes API.
///
/// The client is created on the first fetch (in-cluster configuration, then
/// kubeconfig), so missing credentials surface as failed polls.
pub struct KubeSource {
    config: SourceConfig,
    api: OnceCell<Api<DynamicObject>>,
}

impl KubeSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            config: config.clone(),
            api: OnceCell::new(),
        }
    }

    /// Use an existing client instead of connecting lazily.
    pub fn with_client(client: kube::Client, config: &SourceConfig) -> Self {
        Self {
            config: config.clone(),
            api: OnceCell::new_with(Some(Self::api(client, config))),
        }
    }

    fn api(client: kube::Client, config: &SourceConfig) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&config.group, &config.version, &config.resource_kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, &config.plural);

        match &config.namespace {
            Some(namespace) => Api::namespaced_with(client, namespace, &resource),
            None => Api::all_with(client, &resource),
        }
    }
}

#[async_trait]
impl RecordSource for KubeSource {
    async fn fetch(&self) -> Result<Vec<Record>, SourceError> {
        let api = self
            .api
            .get_or_try_init(|| async {
                let client = kube::Client::try_default().await?;
                info!("Connected to Kubernetes API");
                Ok::<_, SourceError>(Self::api(client, &self.config))
            })
            .await?;

        let list = api.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "Listed custom resources");

        list.items
            .into_iter()
            .map(|object| {
                serde_json::to_value(object)
                    .map(Record::new)
                    .map_err(|e| SourceError::Decode(e.to_string()))
            })
            .collect()
    }

    fn describe(&self) -> String {
        describe(&self.config, "api")
    }
}

/// Shells out to `kubectl get <resource> -o json`.
pub struct KubectlSource {
    program: String,
    args: Vec<String>,
    description: String,
}

impl KubectlSource {
    pub fn new(config: &SourceConfig) -> Self {
        let mut args = vec![
            "get".to_string(),
            format!("{}.{}", config.plural, config.group),
            "-o".to_string(),
            "json".to_string(),
        ];

        match &config.namespace {
            Some(namespace) => {
                args.push("-n".to_string());
                args.push(namespace.clone());
            }
            None => args.push("--all-namespaces".to_string()),
        }

        Self {
            program: config.kubectl_path.clone(),
            args,
            description: describe(config, "kubectl"),
        }
    }

    /// Arguments passed to kubectl.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl RecordSource for KubectlSource {
    async fn fetch(&self) -> Result<Vec<Record>, SourceError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| SourceError::Fetch(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Fetch(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        decode_list(&output.stdout)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Decode a Kubernetes list response (`{"items": [...]}`) into records.
pub fn decode_list(body: &[u8]) -> Result<Vec<Record>, SourceError> {
    let mut response: Value =
        serde_json::from_slice(body).map_err(|e| SourceError::Decode(e.to_string()))?;

    match response.get_mut("items").map(Value::take) {
        Some(Value::Array(items)) => Ok(items.into_iter().map(Record::new).collect()),
        Some(Value::Null) | None => Err(SourceError::Decode(
            "response has no items".to_string(),
        )),
        Some(_) => Err(SourceError::Decode("items is not a list".to_string())),
    }
}

fn describe(config: &SourceConfig, backend: &str) -> String {
    format!(
        "{} {}.{}/{} in {}",
        backend,
        config.plural,
        config.group,
        config.version,
        config.namespace.as_deref().unwrap_or("all namespaces")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, Response, StatusCode};
    use kube::client::Body;
    use parking_lot::Mutex;
    use std::convert::Infallible;

    const RESULT_LIST: &str = r#"{
        "apiVersion": "core.k8sgpt.ai/v1alpha1",
        "kind": "ResultList",
        "metadata": { "resourceVersion": "42" },
        "items": [
            {
                "apiVersion": "core.k8sgpt.ai/v1alpha1",
                "kind": "Result",
                "metadata": { "name": "k8sgptapi", "namespace": "k8sgpt" },
                "spec": {
                    "kind": "Pod",
                    "name": "k8sgpt/api",
                    "error": [{ "text": "Container was OOMKilled" }]
                }
            }
        ]
    }"#;

    const INTERNAL_ERROR: &str = r#"{
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": "boom",
        "reason": "InternalError",
        "code": 500
    }"#;

    /// Client answering every request with a canned response and recording
    /// the requested paths.
    fn canned_client(
        status: StatusCode,
        body: &'static str,
    ) -> (kube::Client, Arc<Mutex<Vec<String>>>) {
        let paths = Arc::new(Mutex::new(Vec::new()));
        let seen = paths.clone();

        let service = tower::service_fn(move |request: Request<Body>| {
            seen.lock().push(request.uri().path().to_string());
            async move {
                let response = Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(body.as_bytes().to_vec()))
                    .unwrap();
                Ok::<_, Infallible>(response)
            }
        });

        (kube::Client::new(service, "default"), paths)
    }

    #[tokio::test]
    async fn test_kube_source_lists_namespaced_results() {
        let (client, paths) = canned_client(StatusCode::OK, RESULT_LIST);
        let config = SourceConfig {
            namespace: Some("k8sgpt".to_string()),
            ..Default::default()
        };
        let source = KubeSource::with_client(client, &config);

        let records = source.fetch().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_value()["spec"]["kind"], "Pod");
        assert_eq!(records[0].as_value()["metadata"]["namespace"], "k8sgpt");
        assert_eq!(
            paths.lock().as_slice(),
            &["/apis/core.k8sgpt.ai/v1alpha1/namespaces/k8sgpt/results"]
        );
    }

    #[tokio::test]
    async fn test_kube_source_lists_all_namespaces() {
        let (client, paths) = canned_client(StatusCode::OK, RESULT_LIST);
        let source = KubeSource::with_client(client, &SourceConfig::default());

        source.fetch().await.unwrap();

        assert_eq!(
            paths.lock().as_slice(),
            &["/apis/core.k8sgpt.ai/v1alpha1/results"]
        );
    }

    #[tokio::test]
    async fn test_kube_source_garbage_body_is_decode_error() {
        let (client, _) = canned_client(StatusCode::OK, "<html>not json</html>");
        let source = KubeSource::with_client(client, &SourceConfig::default());

        let result = source.fetch().await;
        assert!(matches!(result, Err(SourceError::Decode(_))));
    }

    #[tokio::test]
    async fn test_kube_source_server_error_is_fetch_error() {
        let (client, _) = canned_client(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR);
        let source = KubeSource::with_client(client, &SourceConfig::default());

        let result = source.fetch().await;
        assert!(matches!(result, Err(SourceError::Fetch(msg)) if msg.contains("boom")));
    }

    #[test]
    fn test_decode_list() {
        let body = br#"{
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                { "metadata": { "namespace": "ops" }, "spec": { "kind": "Pod" } },
                { "metadata": { "namespace": "web" } }
            ]
        }"#;

        let records = decode_list(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_value()["spec"]["kind"], "Pod");
    }

    #[test]
    fn test_decode_empty_list() {
        let records = decode_list(br#"{ "items": [] }"#).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_decode_invalid_json() {
        let result = decode_list(b"error: the server doesn't have a resource type");
        assert!(matches!(result, Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_decode_missing_items() {
        let result = decode_list(br#"{ "kind": "Status" }"#);
        assert!(matches!(result, Err(SourceError::Decode(msg)) if msg.contains("no items")));
    }

    #[test]
    fn test_decode_items_not_a_list() {
        let result = decode_list(br#"{ "items": "nope" }"#);
        assert!(matches!(result, Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_kubectl_args_all_namespaces() {
        let source = KubectlSource::new(&SourceConfig::default());
        assert_eq!(
            source.args(),
            &["get", "results.core.k8sgpt.ai", "-o", "json", "--all-namespaces"]
        );
        assert_eq!(
            source.describe(),
            "kubectl results.core.k8sgpt.ai/v1alpha1 in all namespaces"
        );
    }

    #[test]
    fn test_kubectl_args_namespaced() {
        let config = SourceConfig {
            namespace: Some("k8sgpt".to_string()),
            ..Default::default()
        };
        let source = KubectlSource::new(&config);
        assert_eq!(&source.args()[4..], &["-n", "k8sgpt"]);
    }

    #[tokio::test]
    async fn test_kubectl_missing_binary_is_fetch_error() {
        let config = SourceConfig {
            kind: SourceKind::Kubectl,
            kubectl_path: "/nonexistent/kubectl".to_string(),
            ..Default::default()
        };
        let source = KubectlSource::new(&config);

        let result = source.fetch().await;
        assert!(matches!(result, Err(SourceError::Fetch(_))));
    }
}
