//! Function resource generation.
//!
//! Turns a [`FunctionDefinition`] into the `Function` custom resource the
//! cluster controller consumes. Pure: no cluster access.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubefn_k8s::{
    ContainerTemplate, DESCRIPTION_ANNOTATION, EnvEntry, EventType, Function, FunctionSpec,
    MemoryResources,
};
use kubefn_types::{EventSource, FunctionDefinition};

/// Unit appended to memory values given as a bare number
pub const DEFAULT_MEMORY_UNIT: &str = "Mi";

/// Append the default unit to purely numeric memory values
pub fn normalize_memory(value: &str) -> String {
    let value = value.trim();
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        format!("{}{}", value, DEFAULT_MEMORY_UNIT)
    } else {
        value.to_string()
    }
}

/// Generate the Function resource for a definition
pub fn build_function(def: &FunctionDefinition, namespace: &str) -> Function {
    let (event_type, topic) = match &def.event {
        EventSource::Http { .. } => (EventType::Http, String::new()),
        EventSource::Trigger { topic } => (EventType::PubSub, topic.clone()),
    };

    let spec = FunctionSpec {
        handler: def.handler.clone(),
        runtime: def.runtime.clone(),
        function: def.source.clone(),
        deps: def.dependencies.clone().unwrap_or_default(),
        event_type,
        topic,
        template: container_template(def),
    };

    let mut function = Function::new(&def.name, spec);
    function.metadata = ObjectMeta {
        name: Some(def.name.clone()),
        namespace: Some(namespace.to_string()),
        labels: if def.labels.is_empty() {
            None
        } else {
            Some(def.labels.clone())
        },
        annotations: def.description.as_ref().map(|description| {
            BTreeMap::from([(DESCRIPTION_ANNOTATION.to_string(), description.clone())])
        }),
        ..Default::default()
    };
    function
}

/// Container overrides, only when the definition sets env or memory
fn container_template(def: &FunctionDefinition) -> Option<ContainerTemplate> {
    if def.environment.is_empty() && def.memory.is_none() {
        return None;
    }

    // BTreeMap iteration keeps env order stable between builds
    let env = def
        .environment
        .iter()
        .map(|(name, value)| EnvEntry {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();

    let resources = def.memory.as_deref().map(|memory| {
        let memory = normalize_memory(memory);
        MemoryResources {
            limits: BTreeMap::from([("memory".to_string(), memory.clone())]),
            requests: BTreeMap::from([("memory".to_string(), memory)]),
        }
    });

    Some(ContainerTemplate { env, resources })
}

/// Two Function documents are equivalent when their spec payloads match;
/// metadata such as labels and annotations is not compared.
pub fn is_equivalent(desired: &Function, observed: &Function) -> bool {
    desired.spec == observed.spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefn_types::EventDescriptor;

    fn hello() -> FunctionDefinition {
        FunctionDefinition::new(
            "hello",
            "python2.7",
            "handler.hello",
            "def hello():\n    return 'hello world'\n",
        )
    }

    #[test]
    fn test_http_event_type() {
        let function = build_function(&hello(), "default");
        assert_eq!(function.spec.event_type, EventType::Http);
        assert!(function.spec.topic.is_empty());
        assert_eq!(function.metadata.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn test_trigger_event_keeps_topic() {
        let def = hello()
            .with_events(vec![EventDescriptor::trigger("orders")])
            .unwrap();
        let function = build_function(&def, "default");
        assert_eq!(function.spec.event_type, EventType::PubSub);
        assert_eq!(function.spec.topic, "orders");
    }

    #[test]
    fn test_numeric_memory_gets_default_unit() {
        let function = build_function(&hello().with_memory("128"), "default");
        let resources = function.spec.template.unwrap().resources.unwrap();
        assert_eq!(resources.limits["memory"], "128Mi");
        assert_eq!(resources.requests["memory"], "128Mi");
    }

    #[test]
    fn test_memory_with_unit_passes_through() {
        assert_eq!(normalize_memory("256Mi"), "256Mi");
        assert_eq!(normalize_memory("1Gi"), "1Gi");
    }

    #[test]
    fn test_no_template_without_env_or_memory() {
        let function = build_function(&hello(), "default");
        assert!(function.spec.template.is_none());

        let function = build_function(&hello().with_env("GREETING", "hi"), "default");
        let template = function.spec.template.unwrap();
        assert_eq!(
            template.env,
            vec![EnvEntry {
                name: "GREETING".to_string(),
                value: "hi".to_string()
            }]
        );
        assert!(template.resources.is_none());
    }

    #[test]
    fn test_description_and_labels_in_metadata() {
        let def = hello()
            .with_description("says hello")
            .with_label("team", "core");
        let function = build_function(&def, "default");
        let annotations = function.metadata.annotations.unwrap();
        assert_eq!(annotations[DESCRIPTION_ANNOTATION], "says hello");
        assert_eq!(function.metadata.labels.unwrap()["team"], "core");
    }

    #[test]
    fn test_equivalence_ignores_metadata() {
        let first = build_function(&hello(), "default");
        let second = build_function(&hello().with_description("changed"), "default");
        assert!(is_equivalent(&first, &first));
        assert!(is_equivalent(&first, &second));

        let changed = build_function(&hello().with_memory("512"), "default");
        assert!(!is_equivalent(&first, &changed));
    }
}
