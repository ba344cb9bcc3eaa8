use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, SecurityContext,
};

pub const IMAGE: &str = "quay.io/brancz/kube-rbac-proxy:v0.13.0";

/// Where the sidecar listens.
pub enum Listen {
    /// All interfaces of the pod network namespace.
    AnyAddress,
    /// The pod IP, for host-network pods whose upstream binds localhost.
    PodIp,
}

/// A kube-rbac-proxy sidecar terminating TLS on `port` and forwarding to
/// a localhost `upstream_port`.
pub fn sidecar(name: &str, port_name: &str, port: i32, upstream_port: i32, listen: Listen) -> Container {
    let (address, env) = match listen {
        Listen::AnyAddress => ("0.0.0.0".to_string(), None),
        Listen::PodIp => (
            "[$(IP)]".to_string(),
            Some(vec![EnvVar {
                name: "IP".into(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "status.podIP".into(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
        ),
    };
    Container {
        name: name.into(),
        image: Some(IMAGE.into()),
        args: Some(vec![
            format!("--secure-listen-address={address}:{port}"),
            "--tls-cipher-suites=TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384".into(),
            format!("--upstream=http://127.0.0.1:{upstream_port}/"),
        ]),
        env,
        ports: Some(vec![ContainerPort {
            name: Some(port_name.into()),
            container_port: port,
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            run_as_user: Some(65534),
            run_as_group: Some(65534),
            run_as_non_root: Some(true),
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}
