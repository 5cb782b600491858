//! The slice: policies, templates, links and entities for one evaluation context.
//!
//! A slice is immutable once built. Building it parses every policy,
//! constructs the entity store (rejecting cycles), and expands template
//! links into concrete policies. Links that cannot be instantiated are
//! skipped and kept in [`Slice::link_errors`].
//!
//! Wire format:
//!
//! ```json
//! {
//!   "policies": { "<id>": "<policy text or AST>" },
//!   "entities": [ { "uid": {..}, "attrs": {..}, "parents": [..] } ],
//!   "templates": { "<id>": "<template text or AST>" },
//!   "templateInstantiations": [ { "template": "<id>", "bindings": { "?principal": {..} } } ]
//! }
//! ```
//!
//! Policy order in the document is the policy set order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::entities::EntityStore;
use crate::error::PolicyError;
use crate::loader::compile_policy;
use crate::parser::parse_policy;
use crate::policy_set::PolicySet;
use crate::template::{Template, TemplateLink, instantiate};
use crate::types::{Entity, Policy, PolicyId, PolicyVersion};

/// A link that was skipped while building the slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkError {
    pub link: TemplateLink,
    pub error: PolicyError,
}

#[derive(Debug, Clone)]
pub struct Slice {
    policies: PolicySet,
    entities: EntityStore,
    templates: Vec<Template>,
    links: Vec<TemplateLink>,
    /// Static policies followed by linked ones; what the evaluator sees.
    expanded: PolicySet,
    link_errors: Vec<LinkError>,
    version: PolicyVersion,
}

impl Slice {
    pub fn builder() -> SliceBuilder {
        SliceBuilder::default()
    }

    /// A slice holding only the policies in `text`.
    pub fn from_policy_text(text: &str) -> Result<Self, PolicyError> {
        Slice::builder().policy_text(text)?.build()
    }

    pub fn from_json(text: &str) -> Result<Self, PolicyError> {
        let document: SliceDocument = serde_json::from_str(text)?;
        Slice::from_document(document)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, PolicyError> {
        let document: SliceDocument = serde_json::from_value(value)?;
        Slice::from_document(document)
    }

    fn from_document(document: SliceDocument) -> Result<Self, PolicyError> {
        let mut builder = Slice::builder();
        for (id, source) in document.policies {
            builder = builder.policy(source.into_policy(id)?);
        }
        for (id, source) in document.templates {
            builder = builder.template(Template::new(source.into_policy(id)?));
        }
        builder
            .entities(document.entities)
            .links(document.template_instantiations)
            .build()
    }

    /// Serialise to the wire format, with policies written as text.
    pub fn to_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(&self.document())?)
    }

    pub fn to_json_pretty(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string_pretty(&self.document())?)
    }

    fn document(&self) -> SliceDocument {
        document_of(&self.policies, &self.entities, &self.templates, &self.links)
    }

    /// The static policies, as given.
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Static and linked policies, in evaluation order.
    pub fn expanded(&self) -> &PolicySet {
        &self.expanded
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn template(&self, id: &PolicyId) -> Option<&Template> {
        self.templates.iter().find(|t| t.id() == id)
    }

    pub fn links(&self) -> &[TemplateLink] {
        &self.links
    }

    pub fn link_errors(&self) -> &[LinkError] {
        &self.link_errors
    }

    pub fn version(&self) -> &PolicyVersion {
        &self.version
    }
}

/// Collects the parts of a slice; [`SliceBuilder::build`] validates them.
#[derive(Debug, Clone, Default)]
pub struct SliceBuilder {
    policies: Vec<Policy>,
    entities: Vec<Entity>,
    templates: Vec<Template>,
    links: Vec<TemplateLink>,
}

impl SliceBuilder {
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policies(mut self, policies: impl IntoIterator<Item = Policy>) -> Self {
        self.policies.extend(policies);
        self
    }

    /// Parse `text` and append its policies.
    pub fn policy_text(self, text: &str) -> Result<Self, PolicyError> {
        Ok(self.policies(compile_policy(text)?))
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entities(mut self, entities: impl IntoIterator<Item = Entity>) -> Self {
        self.entities.extend(entities);
        self
    }

    pub fn template(mut self, template: Template) -> Self {
        self.templates.push(template);
        self
    }

    pub fn templates(mut self, templates: impl IntoIterator<Item = Template>) -> Self {
        self.templates.extend(templates);
        self
    }

    /// Parse a single template and store it under `id`.
    pub fn template_text(self, id: impl Into<PolicyId>, text: &str) -> Result<Self, PolicyError> {
        Ok(self.template(Template::parse(id, text)?))
    }

    pub fn link(mut self, link: TemplateLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn links(mut self, links: impl IntoIterator<Item = TemplateLink>) -> Self {
        self.links.extend(links);
        self
    }

    pub fn build(self) -> Result<Slice, PolicyError> {
        let policies = PolicySet::from_policies(self.policies)?;
        let entities = EntityStore::new(self.entities)?;

        let mut templates: Vec<Template> = Vec::with_capacity(self.templates.len());
        for template in self.templates {
            let id = template.id();
            if policies.contains(id) || templates.iter().any(|t| t.id() == id) {
                return Err(PolicyError::DuplicatePolicyId(id.to_string()));
            }
            templates.push(template);
        }

        let mut expanded = policies.clone();
        let mut link_errors = Vec::new();
        for link in &self.links {
            let outcome = expand_link(&templates, link, &expanded).and_then(|policy| match policy {
                Some(policy) => expanded.add(policy),
                None => Ok(()),
            });
            if let Err(error) = outcome {
                warn!(
                    event = "Slice",
                    phase = "Link",
                    template = link.template.to_string(),
                    error = error.to_string()
                );
                link_errors.push(LinkError {
                    link: link.clone(),
                    error,
                });
            }
        }

        let document = document_of(&policies, &entities, &templates, &self.links);
        let version = PolicyVersion {
            hash: format!("{:x}", Sha256::digest(serde_json::to_vec(&document)?)),
            loaded_at: Utc::now().to_rfc3339(),
        };

        debug!(
            event = "Slice",
            phase = "Built",
            policies = policies.len(),
            templates = templates.len(),
            linked = expanded.len() - policies.len(),
            link_errors = link_errors.len(),
            entities = entities.len(),
            hash = version.hash
        );

        Ok(Slice {
            policies,
            entities,
            templates,
            links: self.links,
            expanded,
            link_errors,
            version,
        })
    }
}

/// Instantiate one link. `None` means an identical link was already expanded.
fn expand_link(
    templates: &[Template],
    link: &TemplateLink,
    expanded: &PolicySet,
) -> Result<Option<Policy>, PolicyError> {
    let template = templates
        .iter()
        .find(|t| *t.id() == link.template)
        .ok_or_else(|| PolicyError::UnknownTemplate(link.template.to_string()))?;
    let policy = instantiate(template, &link.bindings)?;
    match expanded.get(policy.id()) {
        Some(existing) if *existing == policy => Ok(None),
        Some(_) => Err(PolicyError::DuplicatePolicyId(policy.id().to_string())),
        None => Ok(Some(policy)),
    }
}

fn document_of(
    policies: &PolicySet,
    entities: &EntityStore,
    templates: &[Template],
    links: &[TemplateLink],
) -> SliceDocument {
    SliceDocument {
        policies: policies
            .iter()
            .map(|p| (p.id().to_string(), PolicySource::Text(p.to_string())))
            .collect(),
        entities: entities.iter().cloned().collect(),
        templates: templates
            .iter()
            .map(|t| (t.id().to_string(), PolicySource::Text(t.policy().to_string())))
            .collect(),
        template_instantiations: links.to_vec(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SliceDocument {
    #[serde(default, with = "ordered_map")]
    policies: Vec<(String, PolicySource)>,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default, with = "ordered_map")]
    templates: Vec<(String, PolicySource)>,
    #[serde(default)]
    template_instantiations: Vec<TemplateLink>,
}

/// A policy on the wire: source text, or the serialised syntax tree.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum PolicySource {
    Text(String),
    Ast(Box<Policy>),
}

impl PolicySource {
    /// Parse (or re-validate) the policy and name it after its key.
    ///
    /// Syntax trees go through their text form so they pass the same
    /// checks as text, slot placement included.
    fn into_policy(self, id: String) -> Result<Policy, PolicyError> {
        let mut policy = match self {
            PolicySource::Text(text) => parse_policy(&text)?,
            PolicySource::Ast(policy) => parse_policy(&policy.to_string())?,
        };
        policy.set_id(PolicyId::new(id));
        Ok(policy)
    }
}

/// JSON objects read and written as ordered `(key, value)` lists.
mod ordered_map {
    use std::fmt::{Formatter, Result as FmtResult};

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    use super::PolicySource;

    type Entries = Vec<(String, PolicySource)>;

    pub(super) fn serialize<S: Serializer>(entries: &Entries, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_map(entries.iter().map(|(k, v)| (k, v)))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Entries, D::Error> {
        de.deserialize_map(EntriesVisitor)
    }

    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Entries;

        fn expecting(&self, f: &mut Formatter<'_>) -> FmtResult {
            f.write_str("a map from policy id to policy")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Entries, A::Error> {
            let mut entries = Vec::new();
            while let Some(entry) = map.next_entry::<String, PolicySource>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }
}
