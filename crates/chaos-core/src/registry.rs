//! The static effect catalog.
//!
//! Effects are registered through an explicit table of
//! [`EffectRegistration`]s. [`EffectRegistry::build`] evaluates each
//! descriptor once, validates it, sorts the survivors by identifier
//! (case-insensitively) and assigns dense indices `[0, N)`. The catalog is
//! immutable afterwards; live-tunable values such as weight and enabled
//! state live in [`EffectSettingsStore`].
//!
//! Invalid registrations never abort the build. Each problem is logged and
//! recorded as a [`CatalogIssue`], and the offending entry is excluded.
//!
//! [`EffectSettingsStore`]: crate::settings::EffectSettingsStore

use std::any::TypeId;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chaos_types::{DurationKind, EffectIndex, RepetitionScope};
use tracing::{error, info, warn};

use crate::builtin::Nothing;
use crate::effect::Effect;
use crate::eligibility::ActivationContext;

/// Identifier of the always-available fallback effect.
pub const FALLBACK_IDENTIFIER: &str = "nothing";

/// A custom eligibility predicate supplied by an effect.
pub type CanActivateFn = Arc<dyn Fn(&ActivationContext) -> bool + Send + Sync>;

/// A dynamic selection weight multiplier supplied by an effect.
pub type WeightMultiplierFn = Arc<dyn Fn() -> f32 + Send + Sync>;

type EffectFactory = fn() -> Box<dyn Effect>;

fn create_boxed<T: Effect + Default>() -> Box<dyn Effect> {
    Box::new(T::default())
}

/// Reference to another effect an effect cannot run alongside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncompatibleRef {
    /// By case-insensitive identifier.
    Identifier(String),
    /// By payload type.
    Type {
        /// The payload's type ID.
        type_id: TypeId,
        /// The payload's type name, for diagnostics.
        type_name: &'static str,
    },
}

impl core::fmt::Display for IncompatibleRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Identifier(identifier) => f.write_str(identifier),
            Self::Type { type_name, .. } => f.write_str(type_name),
        }
    }
}

/// Registration-time metadata for one effect, built with a fluent API.
pub struct EffectDescriptor {
    identifier: String,
    display_name: String,
    payload_type: TypeId,
    payload_type_name: &'static str,
    factory: EffectFactory,
    weight: f32,
    repetition_decay: f32,
    repetition_scope: RepetitionScope,
    networked: bool,
    duration: Option<DurationKind>,
    allow_duplicates: bool,
    ignore_duration_modifiers: bool,
    incompatible: Vec<IncompatibleRef>,
    can_activate: Vec<CanActivateFn>,
    weight_multipliers: Vec<WeightMultiplierFn>,
}

impl EffectDescriptor {
    /// Describe an instantaneous effect with payload type `T`, base
    /// weight 1 and no repetition decay.
    pub fn new<T: Effect + Default>(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            payload_type: TypeId::of::<T>(),
            payload_type_name: std::any::type_name::<T>(),
            factory: create_boxed::<T>,
            weight: 1.0,
            repetition_decay: 0.0,
            repetition_scope: RepetitionScope::PerStage,
            networked: false,
            duration: None,
            allow_duplicates: true,
            ignore_duration_modifiers: false,
            incompatible: Vec::new(),
            can_activate: Vec::new(),
            weight_multipliers: Vec::new(),
        }
    }

    /// Base selection weight.
    #[must_use]
    pub const fn weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Fraction of weight lost per prior activation in `scope`.
    #[must_use]
    pub const fn repetition_decay(mut self, decay: f32, scope: RepetitionScope) -> Self {
        self.repetition_decay = decay;
        self.repetition_scope = scope;
        self
    }

    /// Replicate this effect to observers.
    #[must_use]
    pub const fn networked(mut self) -> Self {
        self.networked = true;
        self
    }

    /// Make this a timed effect with the given duration policy.
    #[must_use]
    pub const fn timed(mut self, duration: DurationKind) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Whether a second instance may start while one is active.
    #[must_use]
    pub const fn allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Keep this effect's duration unaffected by duration multipliers.
    #[must_use]
    pub const fn ignore_duration_modifiers(mut self) -> Self {
        self.ignore_duration_modifiers = true;
        self
    }

    /// Never run while an effect with payload type `T` is active.
    #[must_use]
    pub fn incompatible_with<T: Effect>(mut self) -> Self {
        self.incompatible.push(IncompatibleRef::Type {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        });
        self
    }

    /// Never run while the effect with `identifier` is active.
    #[must_use]
    pub fn incompatible_with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.incompatible
            .push(IncompatibleRef::Identifier(identifier.into()));
        self
    }

    /// Add a custom eligibility predicate.
    #[must_use]
    pub fn can_activate(
        mut self,
        predicate: impl Fn(&ActivationContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.can_activate.push(Arc::new(predicate));
        self
    }

    /// Add a dynamic weight multiplier.
    #[must_use]
    pub fn weight_multiplier(mut self, multiplier: impl Fn() -> f32 + Send + Sync + 'static) -> Self {
        self.weight_multipliers.push(Arc::new(multiplier));
        self
    }

    /// The identifier this descriptor registers.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl core::fmt::Debug for EffectDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EffectDescriptor")
            .field("identifier", &self.identifier)
            .field("payload_type", &self.payload_type_name)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

/// An effect type that can describe itself for the catalog.
pub trait RegisteredEffect: Effect + Default {
    /// Build the catalog descriptor for this effect.
    fn descriptor() -> EffectDescriptor;
}

/// One row of a static registration table.
#[derive(Debug, Clone, Copy)]
pub struct EffectRegistration {
    build: fn() -> EffectDescriptor,
}

impl EffectRegistration {
    /// Register effect type `T`.
    pub const fn of<T: RegisteredEffect>() -> Self {
        Self {
            build: T::descriptor,
        }
    }

    /// Register an arbitrary descriptor constructor.
    pub const fn from_fn(build: fn() -> EffectDescriptor) -> Self {
        Self { build }
    }

    /// Evaluate the descriptor constructor.
    pub fn descriptor(&self) -> EffectDescriptor {
        (self.build)()
    }
}

/// A validated catalog entry.
pub struct EffectDefinition {
    index: EffectIndex,
    identifier: String,
    display_name: String,
    payload_type: TypeId,
    payload_type_name: &'static str,
    factory: EffectFactory,
    default_weight: f32,
    default_repetition_decay: f32,
    default_repetition_scope: RepetitionScope,
    networked: bool,
    duration: Option<DurationKind>,
    allow_duplicates: bool,
    ignore_duration_modifiers: bool,
    incompatible_with: Vec<EffectIndex>,
    can_activate: Vec<CanActivateFn>,
    weight_multipliers: Vec<WeightMultiplierFn>,
}

impl EffectDefinition {
    /// Dense catalog index.
    pub const fn index(&self) -> EffectIndex {
        self.index
    }

    /// Unique identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Human-readable name used in notices.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Rust type name of the payload.
    pub const fn payload_type_name(&self) -> &'static str {
        self.payload_type_name
    }

    /// Whether the payload type is `T`.
    pub fn is_payload<T: Effect>(&self) -> bool {
        self.payload_type == TypeId::of::<T>()
    }

    /// Registered default weight.
    pub const fn default_weight(&self) -> f32 {
        self.default_weight
    }

    /// Registered default repetition decay.
    pub const fn default_repetition_decay(&self) -> f32 {
        self.default_repetition_decay
    }

    /// Registered default repetition scope.
    pub const fn default_repetition_scope(&self) -> RepetitionScope {
        self.default_repetition_scope
    }

    /// Whether dispatches are replicated to observers.
    pub const fn is_networked(&self) -> bool {
        self.networked
    }

    /// Duration policy, for timed effects.
    pub const fn duration(&self) -> Option<DurationKind> {
        self.duration
    }

    /// Whether this is a timed effect.
    pub const fn is_timed(&self) -> bool {
        self.duration.is_some()
    }

    /// Whether a second instance may start while one is active.
    pub const fn allows_duplicates(&self) -> bool {
        self.allow_duplicates
    }

    /// Whether duration multipliers leave this effect alone.
    pub const fn ignores_duration_modifiers(&self) -> bool {
        self.ignore_duration_modifiers
    }

    /// Resolved, symmetric incompatibility set.
    pub fn incompatible_with(&self) -> &[EffectIndex] {
        &self.incompatible_with
    }

    /// Whether every custom predicate accepts `context`.
    pub fn predicates_allow(&self, context: &ActivationContext) -> bool {
        self.can_activate.iter().all(|predicate| predicate(context))
    }

    /// Product of all dynamic weight multipliers.
    pub fn weight_multiplier(&self) -> f32 {
        self.weight_multipliers
            .iter()
            .map(|multiplier| multiplier())
            .product()
    }

    /// Construct a fresh payload instance.
    pub fn create_instance(&self) -> Box<dyn Effect> {
        (self.factory)()
    }
}

impl core::fmt::Debug for EffectDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EffectDefinition")
            .field("index", &self.index)
            .field("identifier", &self.identifier)
            .field("duration", &self.duration)
            .field("networked", &self.networked)
            .field("incompatible_with", &self.incompatible_with)
            .finish_non_exhaustive()
    }
}

/// A problem found while building the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogIssue {
    /// A registration had an empty identifier; it was excluded.
    #[error("effect with payload {type_name} has a blank identifier")]
    BlankIdentifier {
        /// Payload type name.
        type_name: &'static str,
    },

    /// A registration had an empty display name; it was excluded.
    #[error("effect {identifier} has a blank display name")]
    BlankDisplayName {
        /// Effect identifier.
        identifier: String,
    },

    /// Two registrations share an identifier; the later one was excluded.
    #[error("duplicate effect identifier {identifier}")]
    DuplicateIdentifier {
        /// Effect identifier.
        identifier: String,
    },

    /// Two registrations share a payload type; the later one was excluded.
    #[error("effect {identifier} reuses payload type {type_name}")]
    DuplicatePayloadType {
        /// Effect identifier.
        identifier: String,
        /// Payload type name.
        type_name: &'static str,
    },

    /// A registration had a negative or non-finite weight; it was excluded.
    #[error("effect {identifier} has an invalid weight")]
    InvalidWeight {
        /// Effect identifier.
        identifier: String,
    },

    /// An identifier contains uppercase characters; the entry was kept.
    #[error("effect identifier {identifier} contains uppercase characters")]
    UppercaseIdentifier {
        /// Effect identifier.
        identifier: String,
    },

    /// An incompatibility reference matched no registered effect.
    #[error("effect {identifier} is incompatible with unknown effect {reference}")]
    UnresolvedIncompatibility {
        /// Effect identifier.
        identifier: String,
        /// The unresolved reference.
        reference: String,
    },

    /// Lookup by identifier did not return the entry's own index.
    #[error("lookup self-check failed for effect {identifier}")]
    LookupMismatch {
        /// Effect identifier.
        identifier: String,
    },
}

/// The immutable effect catalog.
#[derive(Debug)]
pub struct EffectRegistry {
    definitions: Vec<EffectDefinition>,
    /// Lowercased identifiers, parallel to `definitions` and sorted.
    lookup_keys: Vec<String>,
    by_type: HashMap<TypeId, EffectIndex>,
    fallback: EffectIndex,
    issues: Vec<CatalogIssue>,
}

impl EffectRegistry {
    /// Build the catalog from a static registration table.
    pub fn build(registrations: &[EffectRegistration]) -> Self {
        Self::from_descriptors(registrations.iter().map(EffectRegistration::descriptor))
    }

    /// Build the catalog from already-evaluated descriptors.
    ///
    /// The built-in [`Nothing`] effect is added when no valid descriptor
    /// claims the [`FALLBACK_IDENTIFIER`].
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = EffectDescriptor>) -> Self {
        let mut issues = Vec::new();
        let mut seen_keys = HashSet::new();
        let mut seen_types = HashSet::new();
        let mut accepted = Vec::new();

        for descriptor in descriptors {
            if let Some(issue) = validate(&descriptor, &seen_keys, &seen_types) {
                error!(issue = %issue, "Excluding invalid effect registration");
                issues.push(issue);
                continue;
            }
            if descriptor.identifier.chars().any(char::is_uppercase) {
                let issue = CatalogIssue::UppercaseIdentifier {
                    identifier: descriptor.identifier.clone(),
                };
                warn!(issue = %issue, "Effect identifier should be lowercase");
                issues.push(issue);
            }
            seen_keys.insert(descriptor.identifier.to_lowercase());
            seen_types.insert(descriptor.payload_type);
            accepted.push(descriptor);
        }

        if !seen_keys.contains(FALLBACK_IDENTIFIER) {
            accepted.push(Nothing::descriptor());
        }

        accepted.sort_by(|a, b| compare_identifiers(&a.identifier, &b.identifier));

        let lookup_keys: Vec<String> = accepted
            .iter()
            .map(|descriptor| descriptor.identifier.to_lowercase())
            .collect();

        let mut by_type = HashMap::new();
        for (position, descriptor) in accepted.iter().enumerate() {
            if let Some(index) = EffectIndex::from_usize(position) {
                by_type.entry(descriptor.payload_type).or_insert(index);
            }
        }

        let incompatibility = resolve_incompatibilities(&accepted, &lookup_keys, &by_type, &mut issues);

        let mut definitions = Vec::with_capacity(accepted.len());
        for ((position, descriptor), incompatible_with) in
            accepted.into_iter().enumerate().zip(incompatibility)
        {
            let Some(index) = EffectIndex::from_usize(position) else {
                break;
            };
            definitions.push(EffectDefinition {
                index,
                identifier: descriptor.identifier,
                display_name: descriptor.display_name,
                payload_type: descriptor.payload_type,
                payload_type_name: descriptor.payload_type_name,
                factory: descriptor.factory,
                default_weight: descriptor.weight,
                default_repetition_decay: descriptor.repetition_decay.clamp(0.0, 1.0),
                default_repetition_scope: descriptor.repetition_scope,
                networked: descriptor.networked,
                duration: descriptor.duration,
                allow_duplicates: descriptor.allow_duplicates,
                ignore_duration_modifiers: descriptor.ignore_duration_modifiers,
                incompatible_with: incompatible_with.into_iter().collect(),
                can_activate: descriptor.can_activate,
                weight_multipliers: descriptor.weight_multipliers,
            });
        }

        let fallback = lookup_keys
            .binary_search_by(|key| key.as_str().cmp(FALLBACK_IDENTIFIER))
            .ok()
            .and_then(EffectIndex::from_usize)
            .unwrap_or_default();

        let mut registry = Self {
            definitions,
            lookup_keys,
            by_type,
            fallback,
            issues,
        };
        registry.check_lookups();

        info!(
            effect_count = registry.len(),
            timed_count = registry.timed().count(),
            issue_count = registry.issues.len(),
            "Registered effects"
        );
        registry
    }

    /// Verify that every entry is found at its own index, both by its
    /// identifier and by the upper-cased identifier.
    fn check_lookups(&mut self) {
        let mut mismatches = Vec::new();
        for definition in &self.definitions {
            let exact = self.find_by_identifier(&definition.identifier);
            let upper = self.find_by_identifier(&definition.identifier.to_uppercase());
            if exact != Some(definition.index) || upper != Some(definition.index) {
                mismatches.push(CatalogIssue::LookupMismatch {
                    identifier: definition.identifier.clone(),
                });
            }
        }
        for issue in mismatches {
            error!(issue = %issue, "Effect lookup self-check failed");
            self.issues.push(issue);
        }
    }

    /// Number of registered effects.
    pub const fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the catalog is empty. Never true after [`Self::build`].
    pub const fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Look up by dense index.
    pub fn get(&self, index: EffectIndex) -> Option<&EffectDefinition> {
        self.definitions.get(index.as_usize())
    }

    /// Case-insensitive lookup by identifier, `O(log N)`.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<EffectIndex> {
        let key = identifier.to_lowercase();
        self.lookup_keys
            .binary_search(&key)
            .ok()
            .and_then(EffectIndex::from_usize)
    }

    /// Look up the definition by identifier.
    pub fn definition_by_identifier(&self, identifier: &str) -> Option<&EffectDefinition> {
        self.find_by_identifier(identifier)
            .and_then(|index| self.get(index))
    }

    /// Lookup by payload type, `O(1)`.
    pub fn find_by_type<T: Effect>(&self) -> Option<EffectIndex> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// All definitions in index order.
    pub fn all(&self) -> impl Iterator<Item = &EffectDefinition> {
        self.definitions.iter()
    }

    /// All timed definitions in index order.
    pub fn timed(&self) -> impl Iterator<Item = &EffectDefinition> {
        self.definitions.iter().filter(|definition| definition.is_timed())
    }

    /// Index of the always-available fallback effect.
    pub const fn fallback(&self) -> EffectIndex {
        self.fallback
    }

    /// Problems recorded while building.
    pub fn issues(&self) -> &[CatalogIssue] {
        &self.issues
    }
}

fn compare_identifiers(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn validate(
    descriptor: &EffectDescriptor,
    seen_keys: &HashSet<String>,
    seen_types: &HashSet<TypeId>,
) -> Option<CatalogIssue> {
    if descriptor.identifier.trim().is_empty() {
        return Some(CatalogIssue::BlankIdentifier {
            type_name: descriptor.payload_type_name,
        });
    }
    if descriptor.display_name.trim().is_empty() {
        return Some(CatalogIssue::BlankDisplayName {
            identifier: descriptor.identifier.clone(),
        });
    }
    if seen_keys.contains(&descriptor.identifier.to_lowercase()) {
        return Some(CatalogIssue::DuplicateIdentifier {
            identifier: descriptor.identifier.clone(),
        });
    }
    if seen_types.contains(&descriptor.payload_type) {
        return Some(CatalogIssue::DuplicatePayloadType {
            identifier: descriptor.identifier.clone(),
            type_name: descriptor.payload_type_name,
        });
    }
    if !descriptor.weight.is_finite() || descriptor.weight < 0.0 {
        return Some(CatalogIssue::InvalidWeight {
            identifier: descriptor.identifier.clone(),
        });
    }
    None
}

/// Resolve every incompatibility reference to an index and mirror each
/// edge, so that `a` excludes `b` exactly when `b` excludes `a`.
fn resolve_incompatibilities(
    descriptors: &[EffectDescriptor],
    lookup_keys: &[String],
    by_type: &HashMap<TypeId, EffectIndex>,
    issues: &mut Vec<CatalogIssue>,
) -> Vec<BTreeSet<EffectIndex>> {
    let mut sets: Vec<BTreeSet<EffectIndex>> = vec![BTreeSet::new(); descriptors.len()];

    for (position, descriptor) in descriptors.iter().enumerate() {
        let Some(own) = EffectIndex::from_usize(position) else {
            continue;
        };
        for reference in &descriptor.incompatible {
            let resolved = match reference {
                IncompatibleRef::Identifier(identifier) => lookup_keys
                    .binary_search(&identifier.to_lowercase())
                    .ok()
                    .and_then(EffectIndex::from_usize),
                IncompatibleRef::Type { type_id, .. } => by_type.get(type_id).copied(),
            };
            let Some(other) = resolved else {
                let issue = CatalogIssue::UnresolvedIncompatibility {
                    identifier: descriptor.identifier.clone(),
                    reference: reference.to_string(),
                };
                warn!(issue = %issue, "Ignoring unresolved incompatibility");
                issues.push(issue);
                continue;
            };
            if other == own {
                continue;
            }
            if let Some(set) = sets.get_mut(position) {
                set.insert(other);
            }
            if let Some(set) = sets.get_mut(other.as_usize()) {
                set.insert(own);
            }
        }
    }
    sets
}
