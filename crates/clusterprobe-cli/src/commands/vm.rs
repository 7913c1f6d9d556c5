//! VM provisioning scenario
//!
//! Template → TemplateInstance → VirtualMachine ready, and optionally a
//! LoadBalancer in front of port 22 answered by a real SSH server. With a key,
//! the scenario logs in and checks what the first-boot script left behind.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clusterprobe_common::content::ContentExpectation;
use clusterprobe_common::endpoint::{SshEndpoint, SSH_PORT};
use clusterprobe_common::kube_utils::{HasApiResource, Template};
use clusterprobe_common::names::generate_prefixed_name;
use clusterprobe_common::poll::{wait_for_value, PollSpec, Readiness};
use clusterprobe_common::provider::{
    LoadBalancerProvider, ResourceProvider, TemplateInstanceProvider, VirtualMachineCheck,
};
use clusterprobe_common::provision::provision;
use clusterprobe_common::readiness::ResourceHandle;
use clusterprobe_common::resources::{
    build_service, build_template_instance, service_port, template_vm_name, VmResources,
};
use clusterprobe_common::retry::{retry_with_backoff_if, RetryConfig};
use clusterprobe_common::ssh::{SshCredentials, SshSession};
use clusterprobe_common::{DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE_NAMESPACE, TEST_PREFIX};
use kube::api::{Api, DynamicObject};
use tracing::info;

use super::{cleanup_all, Context, PollArgs};
use crate::{Error, Result};

/// Label KubeVirt puts on a VM's launcher pod
const VM_NAME_LABEL: &str = "vm.kubevirt.io/name";
/// Mode of files written with --upload
const UPLOAD_MODE: i32 = 0o644;

#[derive(Args, Debug)]
pub struct VmArgs {
    /// Instance and VM name (random when omitted)
    #[arg(long)]
    pub name: Option<String>,

    /// OpenShift template to instantiate
    #[arg(long, default_value = DEFAULT_TEMPLATE_NAME)]
    pub template: String,

    /// Namespace the template lives in
    #[arg(long, default_value = DEFAULT_TEMPLATE_NAMESPACE)]
    pub template_namespace: String,

    /// Shell script to run on first boot (merged into cloud-init)
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// CPU request
    #[arg(long, default_value = "500m")]
    pub cpu_request: String,

    /// CPU limit
    #[arg(long, default_value = "1000m")]
    pub cpu_limit: String,

    /// Memory request and limit
    #[arg(long, default_value = "2Gi")]
    pub memory: String,

    /// Instantiate/wait cycles before giving up
    #[arg(long, default_value = "1")]
    pub attempts: u32,

    #[command(flatten)]
    pub poll: PollArgs,

    /// Expose port 22 through a LoadBalancer and wait for an SSH banner
    #[arg(long)]
    pub expose_ssh: bool,

    /// How long the SSH server may take to answer
    #[arg(long, default_value = "300")]
    pub ssh_timeout_secs: u64,

    /// Private key to log in with; enables the in-guest checks below
    #[arg(long, requires = "expose_ssh")]
    pub ssh_key: Option<PathBuf>,

    /// Guest user for --ssh-key
    #[arg(long, default_value = "cloud-user")]
    pub ssh_user: String,

    /// Copy a local file into the guest, as LOCAL:REMOTE (repeatable)
    #[arg(long, value_parser = parse_upload, requires = "ssh_key")]
    pub upload: Vec<(PathBuf, String)>,

    /// Command that must exit zero in the guest (repeatable)
    #[arg(long = "ssh-run", requires = "ssh_key")]
    pub ssh_run: Vec<String>,

    /// Guest file to wait for and check
    #[arg(long, requires = "ssh_key")]
    pub expect_file: Option<String>,

    /// Text --expect-file must contain
    #[arg(long, requires = "expect_file")]
    pub expect_text: Option<String>,

    /// Regex a line of --expect-file must match
    #[arg(long, requires = "expect_file")]
    pub expect_regex: Option<String>,

    /// Exact line count of --expect-file
    #[arg(long, requires = "expect_file")]
    pub expect_lines: Option<usize>,

    /// Leave everything in place afterwards
    #[arg(long)]
    pub keep: bool,
}

fn parse_upload(s: &str) -> std::result::Result<(PathBuf, String), String> {
    match s.split_once(':') {
        Some((local, remote)) if !local.is_empty() && !remote.is_empty() => {
            Ok((PathBuf::from(local), remote.to_string()))
        }
        _ => Err(format!("expected LOCAL:REMOTE, got '{}'", s)),
    }
}

impl VmArgs {
    fn file_expectation(&self) -> Result<ContentExpectation> {
        let expectation = ContentExpectation {
            contains: self.expect_text.clone(),
            lines: self.expect_lines,
            ..Default::default()
        };
        Ok(match &self.expect_regex {
            Some(pattern) => expectation.with_regex(pattern)?,
            None => expectation,
        })
    }

    fn credentials(&self) -> Option<SshCredentials> {
        self.ssh_key
            .as_ref()
            .map(|key| SshCredentials::new(&self.ssh_user, key))
    }
}

pub async fn run(args: VmArgs, ctx: &Context) -> Result<()> {
    let spec = args.poll.spec()?;
    // bad patterns and key paths fail before anything is created
    args.file_expectation()?;
    if let Some(credentials) = args.credentials() {
        credentials.validate()?;
    }
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| generate_prefixed_name(TEST_PREFIX));

    let mut created = Vec::new();
    let result = scenario(&args, &name, &spec, ctx, &mut created).await;

    if args.keep {
        info!(resources = created.len(), "keeping resources");
    } else {
        cleanup_all(&ctx.client, &created).await;
    }
    result
}

async fn scenario(
    args: &VmArgs,
    name: &str,
    spec: &PollSpec,
    ctx: &Context,
    created: &mut Vec<ResourceHandle>,
) -> Result<()> {
    let script = match &args.script {
        Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|e| {
            clusterprobe_common::Error::io(format!("read script {}", path.display()), e)
        })?),
        None => None,
    };

    let template = fetch_template(ctx, &args.template_namespace, &args.template).await?;
    let resources = VmResources {
        cpu_request: args.cpu_request.clone(),
        cpu_limit: args.cpu_limit.clone(),
        memory: args.memory.clone(),
    };
    let instance =
        build_template_instance(name, &ctx.namespace, &template, &resources, script.as_deref())?;
    let vm_name = template_vm_name(&instance)
        .filter(|n| !n.contains("${"))
        .unwrap_or_else(|| name.to_string());

    let provider = TemplateInstanceProvider::new(ctx.client.clone(), &ctx.namespace, instance);
    created.push(provision(&provider, spec, args.attempts, &ctx.cancel).await?);

    let vm = VirtualMachineCheck::new(ctx.client.clone(), &ctx.namespace, &vm_name);
    vm.wait(spec, &ctx.cancel).await?;
    println!("{} is ready", vm.handle());

    if args.expose_ssh {
        let address = expose_ssh(ctx, name, &vm_name, spec, created).await?;
        let ssh_spec =
            PollSpec::with_timeout(spec.interval(), Duration::from_secs(args.ssh_timeout_secs))?;
        let endpoint = SshEndpoint::new(address);

        match args.credentials() {
            Some(credentials) => {
                let session = endpoint
                    .wait_session(&credentials, &ssh_spec, &ctx.cancel)
                    .await?;
                println!("ssh login as {} on {}", credentials.user, session.address());
                verify_guest(args, &session, &ssh_spec, ctx).await?;
            }
            None => {
                let conn = endpoint.wait(&ssh_spec, &ctx.cancel).await?;
                println!("ssh reachable: {}", conn.banner);
            }
        }
    }
    Ok(())
}

async fn fetch_template(ctx: &Context, namespace: &str, name: &str) -> Result<DynamicObject> {
    let api: Api<DynamicObject> =
        Api::namespaced_with(ctx.client.clone(), namespace, &Template::api_resource());
    let target = format!("template {}/{}", namespace, name);

    let template = retry_with_backoff_if(
        &RetryConfig::default(),
        "fetch_template",
        |e: &clusterprobe_common::Error| e.is_retryable() && !e.is_not_found(),
        || {
            let api = api.clone();
            let target = target.clone();
            let name = name.to_string();
            async move {
                api.get(&name)
                    .await
                    .map_err(|e| clusterprobe_common::Error::from_kube_query(target, e))
            }
        },
    )
    .await?;
    info!(template = %target, "fetched template");
    Ok(template)
}

/// LoadBalancer in front of the VM's port 22; returns its external address
async fn expose_ssh(
    ctx: &Context,
    name: &str,
    vm_name: &str,
    spec: &PollSpec,
    created: &mut Vec<ResourceHandle>,
) -> Result<String> {
    let port = i32::from(SSH_PORT);
    let service = build_service(
        &format!("{}-ssh", name),
        &ctx.namespace,
        "LoadBalancer",
        vec![service_port("ssh", port, port, "TCP")],
        BTreeMap::from([(VM_NAME_LABEL.to_string(), vm_name.to_string())]),
    );
    let provider = LoadBalancerProvider::new(ctx.client.clone(), &ctx.namespace, service);
    let handle = provision(&provider, spec, 1, &ctx.cancel).await?;
    created.push(handle.clone());

    let address = provider
        .address(&handle)
        .await?
        .ok_or_else(|| Error::command_failed(format!("{} lost its address", provider.target())))?;
    info!(service = %handle, address = %address, "load balancer ready");
    Ok(address)
}

/// Uploads, then commands, then the expected file, in that order
async fn verify_guest(
    args: &VmArgs,
    session: &SshSession,
    spec: &PollSpec,
    ctx: &Context,
) -> Result<()> {
    for (local, remote) in &args.upload {
        let contents = tokio::fs::read(local).await.map_err(|e| {
            clusterprobe_common::Error::io(format!("read {}", local.display()), e)
        })?;
        session.copy_file(contents, remote, UPLOAD_MODE).await?;
        println!("uploaded {} to {}", local.display(), remote);
    }

    for command in &args.ssh_run {
        let output = session.run_command(command).await?;
        if !output.success() {
            return Err(Error::scenario_failed(format!(
                "`{}` exited with {}: {}",
                command,
                output.exit_status,
                output.combined().trim()
            )));
        }
        print!("{}", output.stdout);
    }

    if let Some(path) = &args.expect_file {
        // the first-boot script may still be running
        let target = format!("file {} on {}", path, session.address());
        let content = wait_for_value(&target, spec, &ctx.cancel, || async {
            session.read_file(path).await.map(Readiness::Ready)
        })
        .await?;
        args.file_expectation()?
            .check(&content)
            .map_err(|reason| Error::scenario_failed(format!("{}: {}", target, reason)))?;
        println!("{} matches", target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: VmArgs,
    }

    #[test]
    fn test_parse_upload() {
        assert_eq!(
            parse_upload("./index.html:/var/www/html/index.html").unwrap(),
            (PathBuf::from("./index.html"), "/var/www/html/index.html".to_string())
        );
        assert!(parse_upload("index.html").is_err());
        assert!(parse_upload(":/tmp/x").is_err());
    }

    #[test]
    fn test_guest_checks_need_a_key() {
        assert!(Wrapper::try_parse_from(["t", "--expect-file", "/tmp/done"]).is_err());
        assert!(Wrapper::try_parse_from(["t", "--ssh-key", "/root/.ssh/id_rsa"]).is_err());

        let w = Wrapper::try_parse_from([
            "t",
            "--expose-ssh",
            "--ssh-key",
            "/root/.ssh/id_rsa",
            "--expect-file",
            "/var/log/httpd-install.log",
            "--expect-regex",
            "^Complete!$",
            "--expect-lines",
            "12",
        ])
        .unwrap();
        assert_eq!(w.args.ssh_user, "cloud-user");
        let creds = w.args.credentials().unwrap();
        assert_eq!(creds.private_key, PathBuf::from("/root/.ssh/id_rsa"));

        let expectation = w.args.file_expectation().unwrap();
        assert_eq!(expectation.lines, Some(12));
        assert!(expectation.check("Installing...\nComplete!\n").is_err());
    }

    #[test]
    fn test_expectation_flags_need_a_file() {
        assert!(Wrapper::try_parse_from(["t", "--expect-text", "ok"]).is_err());
    }
}
