use snafu::Snafu;

#[derive(Debug, Snafu)]
pub struct Error(OpaqueError);
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum OpaqueError {
    #[snafu(display(
        "Cluster '{}' has {} api-endpoint nodes but an api server load balancer '{}' exists",
        cluster,
        count,
        load_balancer
    ))]
    EndpointNodeWithApiLoadBalancer {
        cluster: String,
        count: usize,
        load_balancer: String,
    },

    #[snafu(display("Cluster '{}' has {} api-endpoint nodes, expected at most one", cluster, count))]
    MultipleEndpointNodes { cluster: String, count: usize },

    #[snafu(display("Parse error: {}", source))]
    SerdePlain { source: serde_plain::Error },
}
