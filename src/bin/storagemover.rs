//! Storage Mover CLI - exercise PV/PVC migration independently of the controller.
//!
//! Lets an operator inspect PVs and PVCs in either cluster, preview a
//! translation, wait for EBS volume detachment, and migrate a single volume
//! end to end. Intended for testing and debugging the migration process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use clap::{Parser, Subcommand};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use migration_operator::crd::parse_duration;
use migration_operator::ebs::{EbsClient, VolumeInfo, WaitOptions, DEFAULT_POLL_INTERVAL};
use migration_operator::translate::{
    translate_pv, validate_pv_for_migration, TranslationConfig, TranslationResult,
};

type CliError = Box<dyn std::error::Error + Send + Sync>;

/// Storage Mover - test PV/PVC migration between clusters
#[derive(Parser, Debug)]
#[command(name = "storagemover")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to source cluster kubeconfig
    #[arg(long, global = true)]
    source_kubeconfig: Option<PathBuf>,

    /// Path to destination cluster kubeconfig
    #[arg(long, global = true)]
    dest_kubeconfig: Option<PathBuf>,

    /// AWS region for EBS operations
    #[arg(long, global = true, env = "AWS_REGION")]
    aws_region: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect a PersistentVolume in the source cluster
    InspectPv {
        /// Name of the PV to inspect
        #[arg(long)]
        name: String,
    },

    /// Inspect a PersistentVolumeClaim in the source cluster
    InspectPvc {
        /// Namespace of the PVC
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Name of the PVC to inspect
        #[arg(long)]
        name: String,
    },

    /// Show what the destination PV and PVC would look like without creating them
    Translate {
        /// Source namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Source PVC name
        #[arg(long)]
        name: String,

        /// Destination namespace
        #[arg(long)]
        dest_namespace: String,

        /// Destination PVC name (defaults to source name)
        #[arg(long)]
        dest_pvc_name: Option<String>,
    },

    /// Wait for an EBS volume to detach
    WaitDetach {
        /// EBS volume ID (e.g. vol-0123456789abcdef0)
        #[arg(long)]
        volume_id: String,

        /// Maximum time to wait
        #[arg(long, default_value = "5m")]
        timeout: String,
    },

    /// Migrate a single volume from source to destination cluster
    MigrateVolume {
        /// Source namespace
        #[arg(short = 's', long, default_value = "default")]
        source_namespace: String,

        /// Source PVC name
        #[arg(long)]
        pvc: String,

        /// Destination namespace
        #[arg(short = 'd', long)]
        dest_namespace: String,

        /// Destination PVC name (defaults to source name)
        #[arg(long)]
        dest_pvc_name: Option<String>,

        /// Show what would be created without creating anything
        #[arg(long)]
        dry_run: bool,

        /// Timeout for volume detachment
        #[arg(long, default_value = "5m")]
        timeout: String,
    },

    /// Validate a PV is suitable for migration
    Validate {
        /// Name of the PV to validate
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        Commands::InspectPv { name } => inspect_pv(&cli, name).await,
        Commands::InspectPvc { namespace, name } => inspect_pvc(&cli, namespace, name).await,
        Commands::Translate {
            namespace,
            name,
            dest_namespace,
            dest_pvc_name,
        } => {
            translate(
                &cli,
                namespace,
                name,
                dest_namespace,
                dest_pvc_name.as_deref(),
            )
            .await
        }
        Commands::WaitDetach { volume_id, timeout } => wait_detach(&cli, volume_id, timeout).await,
        Commands::MigrateVolume {
            source_namespace,
            pvc,
            dest_namespace,
            dest_pvc_name,
            dry_run,
            timeout,
        } => {
            migrate_volume(
                &cli,
                source_namespace,
                pvc,
                dest_namespace,
                dest_pvc_name.as_deref(),
                *dry_run,
                timeout,
            )
            .await
        }
        Commands::Validate { name } => validate(&cli, name).await,
    }
}

async fn inspect_pv(cli: &Cli, name: &str) -> Result<(), CliError> {
    let client = kube_client(cli.source_kubeconfig.as_deref()).await?;
    let pvs: Api<PersistentVolume> = Api::all(client);
    let pv = pvs.get(name).await?;
    print_pv_info(&pv);
    Ok(())
}

async fn inspect_pvc(cli: &Cli, namespace: &str, name: &str) -> Result<(), CliError> {
    let client = kube_client(cli.source_kubeconfig.as_deref()).await?;
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let pvc = pvcs.get(name).await?;
    print_pvc_info(&pvc);

    // Also show the bound PV
    if let Some(volume_name) = pvc.spec.as_ref().and_then(|s| s.volume_name.as_deref()) {
        let pvs: Api<PersistentVolume> = Api::all(client);
        if let Ok(pv) = pvs.get(volume_name).await {
            println!("\nBound PV:");
            print_pv_info(&pv);
        }
    }

    Ok(())
}

async fn translate(
    cli: &Cli,
    namespace: &str,
    pvc_name: &str,
    dest_namespace: &str,
    dest_pvc_name: Option<&str>,
) -> Result<(), CliError> {
    let client = kube_client(cli.source_kubeconfig.as_deref()).await?;
    let result =
        fetch_and_translate(&client, namespace, pvc_name, dest_namespace, dest_pvc_name).await?;

    println!("=== Translated PV ===");
    print_pv_info(&result.pv);

    println!("\n=== Translated PVC ===");
    print_pvc_info(&result.pvc);

    println!("\nVolume ID: {}", result.volume_id);
    println!("Availability Zone: {}", result.availability_zone);

    Ok(())
}

async fn wait_detach(cli: &Cli, volume_id: &str, timeout: &str) -> Result<(), CliError> {
    let timeout = parse_timeout(timeout)?;
    let ebs = ebs_client(cli).await?;

    let info = ebs.volume_info(volume_id).await?;
    println!("Volume: {}", volume_id);
    println!("Initial state: {}", info.state);
    println!("AZ: {}", info.availability_zone);

    if !info.attachments.is_empty() {
        println!("Attachments:");
        for att in &info.attachments {
            println!(
                "  - Instance: {}, Device: {}, State: {}",
                att.instance_id, att.device, att.state
            );
        }
    }

    println!("\nWaiting for volume to become available (timeout: {:?})...", timeout);

    let verbose = cli.verbose;
    let on_poll = move |info: &VolumeInfo| {
        if verbose {
            println!("  State: {}", info.state);
        }
    };
    ebs.wait_for_available(
        volume_id,
        WaitOptions {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout,
            on_poll: Some(&on_poll),
        },
    )
    .await?;

    println!("Volume is now available!");
    Ok(())
}

async fn migrate_volume(
    cli: &Cli,
    source_namespace: &str,
    pvc_name: &str,
    dest_namespace: &str,
    dest_pvc_name: Option<&str>,
    dry_run: bool,
    timeout: &str,
) -> Result<(), CliError> {
    let timeout = parse_timeout(timeout)?;

    let source = kube_client(cli.source_kubeconfig.as_deref()).await?;
    let dest = kube_client(cli.dest_kubeconfig.as_deref()).await?;
    let ebs = ebs_client(cli).await?;

    // Step 1 + 2: fetch the source pair and translate it
    println!("Getting source PVC {}/{}...", source_namespace, pvc_name);
    let result = fetch_and_translate(
        &source,
        source_namespace,
        pvc_name,
        dest_namespace,
        dest_pvc_name,
    )
    .await?;

    println!("Volume ID: {}", result.volume_id);
    println!("AZ: {}", result.availability_zone);

    // Step 3: wait for the volume to be available
    println!("Waiting for volume to be available (timeout: {:?})...", timeout);
    let on_poll = |info: &VolumeInfo| {
        println!("  Volume state: {}", info.state);
    };
    ebs.wait_for_available(
        &result.volume_id,
        WaitOptions {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout,
            on_poll: Some(&on_poll),
        },
    )
    .await?;

    let pv_name = result.pv.metadata.name.clone().unwrap_or_default();
    let dest_pvc = result.pvc.metadata.name.clone().unwrap_or_default();

    if dry_run {
        println!("\n[DRY RUN] Would create the following resources:");
        println!("PV: {}", pv_name);
        println!("PVC: {}/{}", dest_namespace, dest_pvc);
        return Ok(());
    }

    // Step 4: create PV in destination
    println!("Creating PV {} in destination...", pv_name);
    let dest_pvs: Api<PersistentVolume> = Api::all(dest.clone());
    dest_pvs.create(&PostParams::default(), &result.pv).await?;

    // Step 5: create PVC in destination, rolling the PV back on failure
    println!("Creating PVC {}/{} in destination...", dest_namespace, dest_pvc);
    let dest_pvcs: Api<PersistentVolumeClaim> = Api::namespaced(dest, dest_namespace);
    if let Err(e) = dest_pvcs.create(&PostParams::default(), &result.pvc).await {
        let _ = dest_pvs.delete(&pv_name, &DeleteParams::default()).await;
        return Err(format!("failed to create destination PVC: {}", e).into());
    }

    println!("\nMigration complete!");
    println!("PV: {}", pv_name);
    println!("PVC: {}/{}", dest_namespace, dest_pvc);

    Ok(())
}

async fn validate(cli: &Cli, name: &str) -> Result<(), CliError> {
    let client = kube_client(cli.source_kubeconfig.as_deref()).await?;
    let pvs: Api<PersistentVolume> = Api::all(client);
    let pv = pvs.get(name).await?;

    if let Err(e) = validate_pv_for_migration(&pv) {
        println!("Validation failed: {}", e);
        return Err(e.into());
    }

    println!("PV is valid for migration");

    let reclaim = pv
        .spec
        .as_ref()
        .and_then(|s| s.persistent_volume_reclaim_policy.as_deref())
        .unwrap_or_default();
    if reclaim != "Retain" {
        println!(
            "Warning: reclaim policy is {} (should be Retain for safe migration)",
            reclaim
        );
    }

    Ok(())
}

// Helper functions

async fn fetch_and_translate(
    source: &Client,
    namespace: &str,
    pvc_name: &str,
    dest_namespace: &str,
    dest_pvc_name: Option<&str>,
) -> Result<TranslationResult, CliError> {
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(source.clone(), namespace);
    let pvc = pvcs.get(pvc_name).await?;

    let volume_name = pvc
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.clone())
        .ok_or_else(|| format!("PVC {}/{} has no bound volume", namespace, pvc_name))?;
    let pvs: Api<PersistentVolume> = Api::all(source.clone());
    let pv = pvs.get(&volume_name).await?;

    let config = TranslationConfig {
        dest_namespace: dest_namespace.to_string(),
        dest_pvc_name: dest_pvc_name.unwrap_or(pvc_name).to_string(),
        storage_class_mapping: Default::default(),
        preserve_node_affinity: true,
    };
    Ok(translate_pv(&pv, &pvc, &config)?)
}

/// Build a kube client from an optional kubeconfig path, falling back to
/// default resolution ($KUBECONFIG, ~/.kube/config, in-cluster).
async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client, CliError> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

async fn ebs_client(cli: &Cli) -> Result<EbsClient, CliError> {
    let region = cli
        .aws_region
        .clone()
        .ok_or("AWS region is required (--aws-region or AWS_REGION env var)")?;
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region))
        .load()
        .await;
    Ok(EbsClient::new(&config))
}

fn parse_timeout(input: &str) -> Result<Duration, CliError> {
    parse_duration(input).ok_or_else(|| format!("invalid duration {:?}", input).into())
}

fn print_pv_info(pv: &PersistentVolume) {
    println!("Name: {}", pv.metadata.name.as_deref().unwrap_or(""));
    if let Some(phase) = pv.status.as_ref().and_then(|s| s.phase.as_deref()) {
        println!("Status: {}", phase);
    }

    let Some(spec) = pv.spec.as_ref() else {
        return;
    };

    if let Some(storage) = spec.capacity.as_ref().and_then(|c| c.get("storage")) {
        println!("Capacity: {}", storage.0);
    }
    if let Some(modes) = &spec.access_modes {
        println!("Access Modes: {:?}", modes);
    }
    if let Some(policy) = &spec.persistent_volume_reclaim_policy {
        println!("Reclaim Policy: {}", policy);
    }
    if let Some(class) = &spec.storage_class_name {
        println!("Storage Class: {}", class);
    }

    if let Some(claim_ref) = &spec.claim_ref {
        println!(
            "Claim: {}/{}",
            claim_ref.namespace.as_deref().unwrap_or(""),
            claim_ref.name.as_deref().unwrap_or("")
        );
    }

    if let Some(csi) = &spec.csi {
        println!("CSI Driver: {}", csi.driver);
        println!("Volume Handle: {}", csi.volume_handle);
    } else if let Some(ebs) = &spec.aws_elastic_block_store {
        println!("EBS Volume ID: {}", ebs.volume_id);
    }

    let zone = migration_operator::translate::extract_availability_zone(pv);
    if !zone.is_empty() {
        println!("Zone: {}", zone);
    }
}

fn print_pvc_info(pvc: &PersistentVolumeClaim) {
    println!("Name: {}", pvc.metadata.name.as_deref().unwrap_or(""));
    println!(
        "Namespace: {}",
        pvc.metadata.namespace.as_deref().unwrap_or("")
    );
    if let Some(phase) = pvc.status.as_ref().and_then(|s| s.phase.as_deref()) {
        println!("Status: {}", phase);
    }

    let Some(spec) = pvc.spec.as_ref() else {
        return;
    };

    if let Some(volume_name) = &spec.volume_name {
        println!("Volume: {}", volume_name);
    }
    if let Some(modes) = &spec.access_modes {
        println!("Access Modes: {:?}", modes);
    }
    if let Some(class) = &spec.storage_class_name {
        println!("Storage Class: {}", class);
    }
    if let Some(request) = spec
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|req| req.get("storage"))
    {
        println!("Requested: {}", request.0);
    }
}
