use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use parley_core::flow::InputRef;

/// Copies other nodes' outputs into a node's local variable names.
///
/// Lookup order per reference, first hit wins: `"<source>.<output>"`, then
/// the bare output name, then the output name's alias candidates in order.
/// Misses leave the target untouched and are returned to the caller.
#[derive(Debug, Clone)]
pub struct InputResolver {
    aliases: HashMap<String, Vec<String>>,
}

impl Default for InputResolver {
    fn default() -> Self {
        Self::new()
            .with_alias("userInput", &["userInput"])
            .with_alias("generatedText", &["generatedText", "generatedOutput"])
    }
}

impl InputResolver {
    /// A resolver with an empty alias table.
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    pub fn with_alias(mut self, output_name: &str, candidates: &[&str]) -> Self {
        self.aliases.insert(
            output_name.to_string(),
            candidates.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    fn lookup(&self, input: &InputRef, variables: &HashMap<String, Value>) -> Option<Value> {
        let qualified = format!("{}.{}", input.source_node_id, input.output_name);
        if let Some(v) = variables.get(&qualified) {
            return Some(v.clone());
        }
        if let Some(v) = variables.get(&input.output_name) {
            return Some(v.clone());
        }
        self.aliases
            .get(&input.output_name)?
            .iter()
            .find_map(|name| variables.get(name).cloned())
    }

    /// Resolve `inputs` into `variables`, returning the references that
    /// matched nothing.
    pub fn resolve(
        &self,
        inputs: &[InputRef],
        variables: &mut HashMap<String, Value>,
    ) -> Vec<InputRef> {
        let mut unresolved = Vec::new();
        for input in inputs {
            match self.lookup(input, variables) {
                Some(value) => {
                    variables.insert(input.input_name.clone(), value);
                }
                None => {
                    warn!(
                        source = %input.source_node_id,
                        output = %input.output_name,
                        input = %input.input_name,
                        "Unresolved input reference"
                    );
                    unresolved.push(input.clone());
                }
            }
        }
        unresolved
    }
}
