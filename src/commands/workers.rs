use anyhow::{Context, Result};

use seqharvest::config::Config;
use seqharvest::storage::{CredentialStore, SqliteCredentialStore};

fn open(config: &Config) -> Result<SqliteCredentialStore> {
    SqliteCredentialStore::new(&config.storage.credentials_path)
        .context("Failed to open credential store")
}

/// Provision (or rotate) a worker credential
pub fn add_worker(config: &Config, identity: &str, secret: &str) -> Result<()> {
    if identity.is_empty() || secret.is_empty() {
        anyhow::bail!("Worker identity and secret must not be empty");
    }

    let credential = open(config)?
        .provision(identity, secret)
        .with_context(|| format!("Failed to provision worker {identity}"))?;

    println!("Provisioned worker {}", credential.identity);
    Ok(())
}

/// Print every provisioned identity
pub fn list_workers(config: &Config) -> Result<()> {
    let identities = open(config)?
        .identities()
        .context("Failed to list workers")?;

    if identities.is_empty() {
        println!("No workers provisioned.");
    }
    for identity in identities {
        println!("{identity}");
    }
    Ok(())
}

/// Remove a worker credential
pub fn revoke_worker(config: &Config, identity: &str) -> Result<()> {
    if open(config)?
        .revoke(identity)
        .with_context(|| format!("Failed to revoke worker {identity}"))?
    {
        println!("Revoked worker {identity}");
    } else {
        println!("Unknown worker {identity}");
    }
    Ok(())
}
