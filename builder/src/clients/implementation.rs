use super::error::{self, EngineError, EngineResult, StoreError, StoreResult};
use super::http_status_code::{HttpStatusCode, StatusCode};
use super::{
    BootstrapEngine, ConfigurationEngine, InClusterEngine, InfrastructureEngine,
    InfrastructureOutcome, InfrastructureState, NodeDeletionOutcome, TaskStore,
};
use log::trace;
use reconciler_model::{ClusterSnapshot, ClusterState, LoadBalancerSnapshot, Task, Workflow};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use snafu::ResultExt;
use std::time::Duration;
use url::Url;

/// Calls an engine's operations as `POST {base_url}/{operation}` with JSON bodies. One instance is
/// created per engine.
#[derive(Clone, Debug)]
pub struct HttpEngineClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpEngineClient {
    pub fn new<S: Into<String>>(base_url: S, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::InitializationFailed(Some(Box::new(e))))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn send<B>(&self, operation: &str, body: &B) -> EngineResult<reqwest::Response>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = format!("{}/{}", self.base_url, operation);
        trace!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::RequestFailed(Some(Box::new(e))))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(EngineError::rejected(format!(
            "'{}' answered {}: {}",
            operation, status, message
        )))
    }

    async fn call<B, R>(&self, operation: &str, body: &B) -> EngineResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.send(operation, body)
            .await?
            .json::<R>()
            .await
            .map_err(|e| EngineError::Serialization(Some(Box::new(e))))
    }

    async fn call_unit<B>(&self, operation: &str, body: &B) -> EngineResult<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        let _ = self.send(operation, body).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl InfrastructureEngine for HttpEngineClient {
    async fn build_infrastructure(
        &self,
        state: InfrastructureState,
    ) -> EngineResult<InfrastructureOutcome> {
        self.call("build-infrastructure", &state).await
    }

    async fn destroy_infrastructure(
        &self,
        current: &ClusterSnapshot,
        current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()> {
        self.call_unit(
            "destroy-infrastructure",
            &json!({ "current": current, "currentLoadBalancers": current_lbs }),
        )
        .await
    }
}

#[async_trait::async_trait]
impl ConfigurationEngine for HttpEngineClient {
    async fn teardown_load_balancers(
        &self,
        desired: &ClusterSnapshot,
        deleted_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot> {
        self.call(
            "teardown-load-balancers",
            &json!({ "desired": desired, "deletedLoadBalancers": deleted_lbs }),
        )
        .await
    }

    async fn install_mesh(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterState> {
        self.call(
            "install-mesh",
            &json!({ "desired": desired, "desiredLoadBalancers": desired_lbs }),
        )
        .await
    }

    async fn install_node_requirements(
        &self,
        desired: &ClusterSnapshot,
    ) -> EngineResult<ClusterSnapshot> {
        self.call("install-node-requirements", &json!({ "desired": desired }))
            .await
    }

    async fn set_up_load_balancers(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
        current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterState> {
        self.call(
            "set-up-load-balancers",
            &json!({
                "desired": desired,
                "desiredLoadBalancers": desired_lbs,
                "currentLoadBalancers": current_lbs,
            }),
        )
        .await
    }

    async fn update_api_endpoint(
        &self,
        current: &ClusterSnapshot,
        nodepool: &str,
        node: &str,
    ) -> EngineResult<ClusterSnapshot> {
        self.call(
            "update-api-endpoint",
            &json!({ "current": current, "nodepool": nodepool, "node": node }),
        )
        .await
    }
}

#[async_trait::async_trait]
impl BootstrapEngine for HttpEngineClient {
    async fn build_cluster(
        &self,
        desired: &ClusterSnapshot,
        desired_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot> {
        self.call(
            "build-cluster",
            &json!({ "desired": desired, "desiredLoadBalancers": desired_lbs }),
        )
        .await
    }

    async fn destroy_cluster(
        &self,
        current: &ClusterSnapshot,
        current_lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<ClusterSnapshot> {
        self.call(
            "destroy-cluster",
            &json!({ "current": current, "currentLoadBalancers": current_lbs }),
        )
        .await
    }
}

#[async_trait::async_trait]
impl InClusterEngine for HttpEngineClient {
    async fn set_up_storage(&self, cluster: &ClusterSnapshot) -> EngineResult<ClusterSnapshot> {
        self.call("set-up-storage", &json!({ "cluster": cluster })).await
    }

    async fn store_kubeconfig(&self, cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call_unit("store-kubeconfig", &json!({ "cluster": cluster }))
            .await
    }

    async fn delete_kubeconfig(&self, cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call_unit("delete-kubeconfig", &json!({ "cluster": cluster }))
            .await
    }

    async fn store_cluster_metadata(
        &self,
        cluster: &ClusterSnapshot,
        lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()> {
        self.call_unit(
            "store-cluster-metadata",
            &json!({ "cluster": cluster, "loadBalancers": lbs }),
        )
        .await
    }

    async fn delete_cluster_metadata(&self, cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call_unit("delete-cluster-metadata", &json!({ "cluster": cluster }))
            .await
    }

    async fn store_lb_scrape_config(
        &self,
        cluster: &ClusterSnapshot,
        lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()> {
        self.call_unit(
            "store-lb-scrape-config",
            &json!({ "cluster": cluster, "loadBalancers": lbs }),
        )
        .await
    }

    async fn remove_lb_scrape_config(&self, cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call_unit("remove-lb-scrape-config", &json!({ "cluster": cluster }))
            .await
    }

    async fn patch_nodes(&self, cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call_unit("patch-nodes", &json!({ "cluster": cluster }))
            .await
    }

    async fn set_up_autoscaler(&self, cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call_unit("set-up-autoscaler", &json!({ "cluster": cluster }))
            .await
    }

    async fn destroy_autoscaler(&self, cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call_unit("destroy-autoscaler", &json!({ "cluster": cluster }))
            .await
    }

    async fn patch_discovery_config_map(&self, cluster: &ClusterSnapshot) -> EngineResult<()> {
        self.call_unit("patch-discovery-config-map", &json!({ "cluster": cluster }))
            .await
    }

    async fn patch_kubeadm_config_map(
        &self,
        cluster: &ClusterSnapshot,
        lbs: &[LoadBalancerSnapshot],
    ) -> EngineResult<()> {
        self.call_unit(
            "patch-kubeadm-config-map",
            &json!({ "cluster": cluster, "loadBalancers": lbs }),
        )
        .await
    }

    async fn safe_delete_nodes(
        &self,
        masters: &[String],
        workers: &[String],
        cluster: &ClusterSnapshot,
    ) -> EngineResult<NodeDeletionOutcome> {
        self.call(
            "safe-delete-nodes",
            &json!({ "masterNodes": masters, "workerNodes": workers, "cluster": cluster }),
        )
        .await
    }
}

/// Talks to the task store's REST API. Conflicts (409) and missing objects (404) are reported as
/// [`StoreError::ConflictingWrite`] and [`StoreError::NotFound`].
#[derive(Clone, Debug)]
pub struct HttpTaskStore {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpTaskStore {
    pub fn new<S: Into<String>>(base_url: S, timeout: Duration) -> StoreResult<Self> {
        let base_url = base_url.into();
        let parsed = Url::parse(base_url.trim_end_matches('/'))
            .context(error::StoreUrlSnafu { url: &base_url })?;
        if parsed.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase)
                .context(error::StoreUrlSnafu { url: &base_url });
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(error::StoreInitializationSnafu)?;
        Ok(Self {
            base_url: parsed,
            client,
        })
    }

    /// The base url followed by `segments`, each of them percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Base urls that cannot have a path are rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn put<B>(&self, url: Url, body: &B, what: String) -> StoreResult<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        trace!("PUT {}", url);
        let result = self
            .client
            .put(url)
            .json(body)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        classify(result, "update", what).map(|_| ())
    }
}

/// Maps the statuses that drive the commit policy onto their dedicated error variants.
fn classify<T>(result: reqwest::Result<T>, method: &str, what: String) -> StoreResult<T> {
    if result.is_status_code(StatusCode::CONFLICT) {
        return error::ConflictingWriteSnafu { what }.fail();
    }
    if result.is_status_code(StatusCode::NOT_FOUND) {
        return error::NotFoundSnafu { what }.fail();
    }
    result.context(error::RequestSnafu { method, what })
}

#[async_trait::async_trait]
impl TaskStore for HttpTaskStore {
    async fn next_task(&self) -> StoreResult<Option<Task>> {
        let url = self.url(&["tasks", "next"]);
        trace!("GET {}", url);
        let result = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        let response = match classify(result, "get", "next task".to_string()) {
            Ok(response) => response,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let task = response.json::<Task>().await.context(error::RequestSnafu {
            method: "decode",
            what: "next task",
        })?;
        Ok(Some(task))
    }

    async fn update_current_state(
        &self,
        config: &str,
        cluster: &str,
        state: Option<&ClusterState>,
    ) -> StoreResult<()> {
        self.put(
            self.url(&["configs", config, "clusters", cluster, "state"]),
            &json!({ "current": state }),
            format!("current state of cluster '{}' in config '{}'", cluster, config),
        )
        .await
    }

    async fn update_task_status(
        &self,
        config: &str,
        cluster: &str,
        task_id: &str,
        workflow: &Workflow,
    ) -> StoreResult<()> {
        self.put(
            self.url(&[
                "configs", config, "clusters", cluster, "tasks", task_id, "workflow",
            ]),
            workflow,
            format!("task '{}' of cluster '{}' in config '{}'", task_id, cluster, config),
        )
        .await
    }
}
