use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use pq_vault::crypto::kem::SecurityLevel;
use pq_vault::crypto::sign::SignatureLevel;
use pq_vault::keys::{KeyManager, KeyOptions, KeyRegistry, KeyType, SealedKeyStore};
use pq_vault::phi::{self, PhiSchema, Record};
use pq_vault::{EncryptedEnvelope, VaultConfig};

#[derive(Parser)]
#[command(name = "pq-vault")]
#[command(about = "Post-quantum envelope encryption and key lifecycle management")]
#[command(version)]
struct Cli {
    /// Sealed key store file
    #[arg(long, global = true, env = "PQ_VAULT_STORE", default_value = "pq-vault.keys.json")]
    store: PathBuf,

    /// Passphrase protecting the key store
    #[arg(long, global = true, env = "PQ_VAULT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// JSON config file; PQ_VAULT_* variables apply when absent
    #[arg(long, global = true, env = "PQ_VAULT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a key store with one primary key per key type
    Init {
        #[arg(long, default_value = "pq-vault")]
        owner: String,
        /// Overwrite an existing store
        #[arg(long)]
        force: bool,
    },
    /// Print key metadata (no secrets) as JSON
    Inventory,
    /// Generate an additional key
    Generate {
        /// MASTER_KEY, DATA_KEY, JWT_SIGNING or AUDIT_SIGNING
        #[arg(long = "type")]
        key_type: KeyType,
        #[arg(long, default_value = "pq-vault")]
        owner: String,
        /// LEVEL_1/3/5 for encryption keys, LEVEL_2/3/5 for signing keys
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        expiry_days: Option<u32>,
        #[arg(long)]
        primary: bool,
    },
    /// Rotate a key; the replacement becomes primary
    Rotate { key_id: String },
    /// Encrypt a file under the primary key of a type
    Encrypt {
        #[arg(long = "type", default_value = "DATA_KEY")]
        key_type: KeyType,
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long = "out")]
        output: PathBuf,
    },
    /// Decrypt an envelope file
    Decrypt {
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long = "out")]
        output: PathBuf,
    },
    /// Encrypt named fields of a JSON record under the DATA_KEY primary
    PhiEncrypt {
        /// Comma-separated field names
        #[arg(long, value_delimiter = ',', required = true)]
        fields: Vec<String>,
        #[arg(long = "in")]
        input: PathBuf,
    },
    /// Decrypt named fields of a JSON record
    PhiDecrypt {
        #[arg(long, value_delimiter = ',', required = true)]
        fields: Vec<String>,
        #[arg(long = "in")]
        input: PathBuf,
    },
    /// Issue a JWT signed by the JWT_SIGNING primary
    IssueToken { subject: String },
    /// Verify a JWT against the key store
    VerifyToken { token: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pq_vault=info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;
    let passphrase = cli
        .passphrase
        .clone()
        .context("a passphrase is required (--passphrase or PQ_VAULT_PASSPHRASE)")?;

    match cli.command {
        Commands::Init { owner, force } => {
            if !force && tokio::fs::try_exists(&cli.store).await? {
                bail!("{} already exists (use --force to overwrite)", cli.store.display());
            }
            let km = KeyManager::new(Arc::new(KeyRegistry::new()), config.clone());
            for key_type in KeyType::ALL {
                let handle = if key_type.is_encryption() {
                    km.generate_encryption_key(key_type, &owner, config.default_kem_level, KeyOptions::default())?
                } else {
                    km.generate_signing_key(
                        key_type,
                        &owner,
                        config.default_signature_level,
                        KeyOptions::default(),
                    )?
                };
                println!("{key_type}\t{}", handle.key_id());
            }
            save(&km, &cli.store, &passphrase).await?;
        }
        Commands::Inventory => {
            let km = open(&cli.store, &passphrase, &config).await?;
            println!("{}", serde_json::to_string_pretty(&km.export_key_inventory())?);
        }
        Commands::Generate {
            key_type,
            owner,
            level,
            expiry_days,
            primary,
        } => {
            let km = open(&cli.store, &passphrase, &config).await?;
            let options = KeyOptions {
                expiry_days,
                make_primary: primary,
                ..KeyOptions::default()
            };
            let handle = if key_type.is_encryption() {
                let level = match level {
                    Some(l) => l.parse::<SecurityLevel>()?,
                    None => config.default_kem_level,
                };
                km.generate_encryption_key(key_type, &owner, level, options)?
            } else {
                let level = match level {
                    Some(l) => l.parse::<SignatureLevel>()?,
                    None => config.default_signature_level,
                };
                km.generate_signing_key(key_type, &owner, level, options)?
            };
            println!("{}", handle.key_id());
            save(&km, &cli.store, &passphrase).await?;
        }
        Commands::Rotate { key_id } => {
            let km = open(&cli.store, &passphrase, &config).await?;
            let rotation = km.rotate_key(&key_id)?;
            println!("{}", serde_json::to_string_pretty(&rotation)?);
            save(&km, &cli.store, &passphrase).await?;
        }
        Commands::Encrypt {
            key_type,
            input,
            output,
        } => {
            let km = open(&cli.store, &passphrase, &config).await?;
            let plaintext = tokio::fs::read(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let envelope = km.encrypt_with_primary(key_type, &plaintext)?;
            tokio::fs::write(&output, envelope.to_json()?).await?;
            save(&km, &cli.store, &passphrase).await?;
        }
        Commands::Decrypt { input, output } => {
            let km = open(&cli.store, &passphrase, &config).await?;
            let json = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let plaintext = km.decrypt(&EncryptedEnvelope::from_json(&json)?)?;
            tokio::fs::write(&output, plaintext).await?;
            save(&km, &cli.store, &passphrase).await?;
        }
        Commands::PhiEncrypt { fields, input } => {
            let km = open(&cli.store, &passphrase, &config).await?;
            let record = read_record(&input).await?;
            let key = km
                .get_primary_key(KeyType::DataKey)
                .context("no active DATA_KEY primary")?;
            let out = phi::encrypt_phi(
                &record,
                &PhiSchema::from_names(fields),
                &key.public_key()?,
                key.key_id(),
            )?;
            km.record_key_usage(key.key_id())?;
            println!("{}", serde_json::to_string_pretty(&out)?);
            save(&km, &cli.store, &passphrase).await?;
        }
        Commands::PhiDecrypt { fields, input } => {
            let km = open(&cli.store, &passphrase, &config).await?;
            let record = read_record(&input).await?;
            let schema = PhiSchema::from_names(fields);
            let first = schema.fields().first().map(|f| f.name.clone()).unwrap_or_default();
            let key_id = record
                .get(&first)
                .and_then(|v| v.as_str())
                .and_then(|s| EncryptedEnvelope::from_base64(s).ok())
                .map(|env| env.key_id)
                .with_context(|| format!("field `{first}` does not hold an envelope"))?;
            let key = km.get_key(&key_id).with_context(|| format!("unknown key {key_id}"))?;
            let out = phi::decrypt_phi(&record, &schema, &key.secret_key()?)?;
            km.record_key_usage(&key_id)?;
            println!("{}", serde_json::to_string_pretty(&out)?);
            save(&km, &cli.store, &passphrase).await?;
        }
        Commands::IssueToken { subject } => {
            let km = open(&cli.store, &passphrase, &config).await?;
            println!("{}", km.issue_jwt(&subject)?);
            save(&km, &cli.store, &passphrase).await?;
        }
        Commands::VerifyToken { token } => {
            let km = open(&cli.store, &passphrase, &config).await?;
            match km.verify_jwt(&token) {
                Some(claims) => println!("{}", serde_json::to_string_pretty(&claims)?),
                None => bail!("token rejected"),
            }
        }
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<VaultConfig> {
    match path {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(VaultConfig::from_json(&json)?)
        }
        None => Ok(VaultConfig::from_env()?),
    }
}

async fn open(path: &Path, passphrase: &str, config: &VaultConfig) -> Result<KeyManager> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading key store {}", path.display()))?;
    let sealed = SealedKeyStore::from_json(&json)?;
    Ok(KeyManager::import_sealed(&sealed, passphrase, config.clone())?)
}

async fn save(km: &KeyManager, path: &Path, passphrase: &str) -> Result<()> {
    let sealed = km.export_sealed(passphrase)?;
    tokio::fs::write(path, sealed.to_json()?)
        .await
        .with_context(|| format!("writing key store {}", path.display()))?;
    Ok(())
}

async fn read_record(path: &Path) -> Result<Record> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_str(&json)?)
}
