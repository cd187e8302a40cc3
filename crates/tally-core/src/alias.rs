//! Identity alias resolution.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::SummaryError;
use crate::types::{Alias, IdentityId, ValidationError};

/// Maps requested identities to the canonical identity owning their history.
///
/// Built once from an explicit identity → aliases relation. Resolution is a
/// pure lookup: a canonical identity resolves to itself, an alias to its one
/// owner, anything else is unknown.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    aliases: HashMap<String, IdentityId>,
    relations: BTreeMap<IdentityId, BTreeSet<Alias>>,
}

impl AliasResolver {
    /// Builds a resolver, rejecting ambiguous aliases.
    pub fn new<I, A>(relations: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (IdentityId, A)>,
        A: IntoIterator<Item = Alias>,
    {
        let mut resolver = Self::default();
        let mut pending: Vec<(IdentityId, Alias)> = Vec::new();
        for (identity, aliases) in relations {
            resolver.relations.entry(identity.clone()).or_default();
            pending.extend(aliases.into_iter().map(|alias| (identity.clone(), alias)));
        }

        for (identity, alias) in pending {
            if resolver.relations.contains_key(alias.as_str()) {
                if alias.as_str() == identity.as_str() {
                    continue;
                }
                return Err(ValidationError::AliasShadowsIdentity {
                    alias: alias.to_string(),
                });
            }
            if let Some(owner) = resolver.aliases.get(alias.as_str()) {
                if *owner != identity {
                    return Err(ValidationError::AliasConflict {
                        alias: alias.to_string(),
                        first: owner.to_string(),
                        second: identity.to_string(),
                    });
                }
                continue;
            }
            resolver
                .aliases
                .insert(alias.as_str().to_string(), identity.clone());
            resolver
                .relations
                .entry(identity)
                .or_default()
                .insert(alias);
        }

        Ok(resolver)
    }

    /// Resolves `requested` to its canonical identity.
    pub fn canonicalize(&self, requested: &str) -> Result<IdentityId, SummaryError> {
        let requested = requested.trim();
        if let Some((identity, _)) = self.relations.get_key_value(requested) {
            return Ok(identity.clone());
        }
        self.aliases
            .get(requested)
            .cloned()
            .ok_or_else(|| SummaryError::NotFound(requested.to_string()))
    }

    /// Aliases that resolve to `identity`.
    pub fn aliases_of(&self, identity: &IdentityId) -> impl Iterator<Item = &Alias> {
        self.relations.get(identity).into_iter().flatten()
    }

    /// Every canonical identity, in order.
    pub fn identities(&self) -> impl Iterator<Item = &IdentityId> {
        self.relations.keys()
    }
}
