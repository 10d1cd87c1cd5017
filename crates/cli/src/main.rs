use aquarium_aws::{AwsDriver, Resource};
use aquarium_aws_core::{Definition, DiskSpec};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aquarium-aws")]
#[command(about = "Manual exerciser for the aquarium-aws dedicated-host pool manager")]
#[command(version)]
struct Cli {
    /// Path to the driver's JSON config file
    #[arg(long, short)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report available capacity for a definition
    Capacity {
        #[arg(long)]
        instance_type: String,
        #[arg(long, default_value_t = 1)]
        cpu: i64,
        #[arg(long, default_value = "")]
        pool: String,
        #[arg(long, default_value = "")]
        subnet: String,
    },

    /// Allocate one instance for a definition
    Allocate {
        #[arg(long)]
        instance_type: String,
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "")]
        pool: String,
        #[arg(long, default_value = "")]
        subnet: String,
        #[arg(long, default_value = "")]
        security_group: String,
    },

    /// Check whether a previously allocated instance is still running
    Status {
        #[arg(long)]
        identifier: String,
        #[arg(long)]
        ip: Option<String>,
    },

    /// Terminate a previously allocated instance
    Deallocate {
        #[arg(long)]
        identifier: String,
        #[arg(long)]
        ip: Option<String>,
    },
}

fn definition(instance_type: String, cpu: i64, pool: String, subnet: String) -> Definition {
    Definition {
        instance_type,
        cpu,
        image: String::new(),
        security_group: String::new(),
        subnet,
        disks: HashMap::<String, DiskSpec>::new(),
        encrypt_key: String::new(),
        tags: HashMap::new(),
        userdata_format: None,
        userdata_prefix: String::new(),
        pool,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config_bytes = std::fs::read(&cli.config)?;
    let driver = AwsDriver::prepare(&config_bytes).await?;

    match cli.command {
        Commands::Capacity { instance_type, cpu, pool, subnet } => {
            let def = definition(instance_type, cpu, pool, subnet);
            let capacity = driver.available_capacity(&def).await?;
            println!("{capacity}");
        }

        Commands::Allocate { instance_type, image, pool, subnet, security_group } => {
            let mut def = definition(instance_type, 1, pool, subnet);
            def.image = image;
            def.security_group = security_group;
            let resource = driver.allocate(&def, &HashMap::new()).await?;
            println!("{} {}", resource.identifier, resource.ip.as_deref().unwrap_or("-"));
        }

        Commands::Status { identifier, ip } => {
            let status = driver.status(&Resource { identifier, ip }).await?;
            println!("{status:?}");
        }

        Commands::Deallocate { identifier, ip } => {
            driver.deallocate(&Resource { identifier, ip }).await?;
            println!("deallocated");
        }
    }

    Ok(())
}
