//! Identity directory management.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Subcommand;

use tally_core::{Alias, IdentityId};
use tally_db::Database;

/// Identity subcommands.
#[derive(Debug, Subcommand)]
pub enum IdentityAction {
    /// Register an identity.
    Add {
        /// Canonical identity name.
        id: String,

        /// Alias to attach (repeatable).
        #[arg(long = "alias", value_name = "ALIAS")]
        aliases: Vec<String>,
    },

    /// Attach an alias to an existing identity.
    Alias {
        /// Canonical identity name.
        id: String,

        /// Alternative name that resolves to the identity.
        alias: String,
    },

    /// List identities with their aliases.
    List,
}

pub fn run<W: Write>(writer: &mut W, db: &Database, action: &IdentityAction) -> Result<()> {
    match action {
        IdentityAction::Add { id, aliases } => {
            let identity = IdentityId::new(id.as_str()).context("invalid identity")?;
            if db.add_identity(&identity)? {
                writeln!(writer, "Added identity {identity}")?;
            } else {
                writeln!(writer, "Identity {identity} already exists")?;
            }
            for alias in aliases {
                add_alias(writer, db, &identity, alias)?;
            }
        }
        IdentityAction::Alias { id, alias } => {
            let identity = IdentityId::new(id.as_str()).context("invalid identity")?;
            add_alias(writer, db, &identity, alias)?;
        }
        IdentityAction::List => list(writer, db)?,
    }
    Ok(())
}

fn add_alias<W: Write>(writer: &mut W, db: &Database, identity: &IdentityId, alias: &str) -> Result<()> {
    let alias = Alias::new(alias).context("invalid alias")?;
    if db
        .add_alias(identity, &alias)
        .with_context(|| format!("failed to add alias {alias}"))?
    {
        writeln!(writer, "Added alias {alias} for {identity}")?;
    } else {
        writeln!(writer, "Alias {alias} already points to {identity}")?;
    }
    Ok(())
}

fn list<W: Write>(writer: &mut W, db: &Database) -> Result<()> {
    let identities = db.list_identities()?;
    if identities.is_empty() {
        writeln!(writer, "No identities registered.")?;
        return Ok(());
    }

    for record in identities {
        let aliases: Vec<&str> = record.aliases.iter().map(Alias::as_str).collect();
        let aliases = if aliases.is_empty() {
            "-".to_string()
        } else {
            aliases.join(", ")
        };
        writeln!(
            writer,
            "{:<16} {:>8} heartbeats  aliases: {aliases}",
            record.id.as_str(),
            record.heartbeats
        )?;
    }
    Ok(())
}
