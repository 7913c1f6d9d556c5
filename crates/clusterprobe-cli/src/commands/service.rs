//! Service creation

use clap::{Args, ValueEnum};
use clusterprobe_common::provider::LoadBalancerProvider;
use clusterprobe_common::provision::provision;
use clusterprobe_common::resources::{build_service, service_port};
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use tracing::info;

use super::pod::parse_label;
use super::{Context, PollArgs};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServiceType {
    #[value(name = "ClusterIP", alias = "cluster-ip")]
    ClusterIp,
    #[value(name = "NodePort", alias = "node-port")]
    NodePort,
    #[value(name = "LoadBalancer", alias = "load-balancer")]
    LoadBalancer,
}

impl ServiceType {
    fn as_str(self) -> &'static str {
        match self {
            ServiceType::ClusterIp => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
        }
    }
}

/// Services are left in place; remove them with `cleanup service <name>`.
#[derive(Args, Debug)]
pub struct ServiceArgs {
    /// Service name
    pub name: String,

    /// Service type
    #[arg(long = "type", value_enum, default_value_t = ServiceType::ClusterIp)]
    pub service_type: ServiceType,

    /// Service port
    #[arg(long)]
    pub port: i32,

    /// Container port (defaults to --port)
    #[arg(long)]
    pub target_port: Option<i32>,

    /// TCP or UDP
    #[arg(long, default_value = "TCP")]
    pub protocol: String,

    /// Pod selector as key=value (app=<name> when omitted)
    #[arg(long = "selector", value_parser = parse_label)]
    pub selector: Vec<(String, String)>,

    /// Create/wait cycles for LoadBalancer services
    #[arg(long, default_value = "1")]
    pub attempts: u32,

    #[command(flatten)]
    pub poll: PollArgs,
}

pub async fn run(args: ServiceArgs, ctx: &Context) -> Result<()> {
    if !(1..=65535).contains(&args.port) {
        return Err(Error::validation(format!("port {} out of range", args.port)));
    }

    let port = service_port(
        &format!("port-{}", args.port),
        args.port,
        args.target_port.unwrap_or(args.port),
        &args.protocol,
    );
    let service = build_service(
        &args.name,
        &ctx.namespace,
        args.service_type.as_str(),
        vec![port],
        args.selector.iter().cloned().collect(),
    );

    if args.service_type != ServiceType::LoadBalancer {
        let api: Api<Service> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
        let created = api
            .create(&PostParams::default(), &service)
            .await
            .map_err(clusterprobe_common::Error::from)?;
        let cluster_ip = created
            .spec
            .and_then(|s| s.cluster_ip)
            .unwrap_or_else(|| "None".to_string());
        info!(service = %args.name, cluster_ip = %cluster_ip, "service created");
        println!("service {}/{} cluster IP {}", ctx.namespace, args.name, cluster_ip);
        return Ok(());
    }

    let spec = args.poll.spec()?;
    let provider = LoadBalancerProvider::new(ctx.client.clone(), &ctx.namespace, service);
    let handle = provision(&provider, &spec, args.attempts, &ctx.cancel).await?;
    let address = provider.address(&handle).await?.unwrap_or_default();
    println!("{} external address {}", handle, address);
    Ok(())
}
