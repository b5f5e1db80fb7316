use crate::config::DifferConfig;
use crate::domain::model::Snapshot;
use crate::domain::ports::StructuralDiffer;
use crate::domain::xml::XmlNode;
use crate::utils::error::{LcrError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

/// In-process structural comparison on canonicalized trees.
///
/// Attribute order, indentation and the order of sibling elements do not count as
/// differences. Each unmatched element counts once; elements with the same name that
/// differ are compared recursively.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalDiffer;

impl CanonicalDiffer {
    pub fn differences(a: &XmlNode, b: &XmlNode) -> usize {
        if a.name != b.name {
            return 1;
        }
        let mut count = 0;
        if a.attributes != b.attributes {
            count += 1;
        }
        if a.text != b.text {
            count += 1;
        }
        count + children_differences(&a.children, &b.children)
    }
}

fn children_differences(a: &[XmlNode], b: &[XmlNode]) -> usize {
    let mut pool: HashMap<String, Vec<&XmlNode>> = HashMap::new();
    for node in b {
        pool.entry(node.canonical_key()).or_default().push(node);
    }

    let mut unmatched_a: Vec<(String, &XmlNode)> = Vec::new();
    for node in a {
        let key = node.canonical_key();
        if pool.get_mut(&key).and_then(Vec::pop).is_none() {
            unmatched_a.push((key, node));
        }
    }
    let mut unmatched_b: Vec<(String, &XmlNode)> = pool
        .into_iter()
        .flat_map(|(key, nodes)| nodes.into_iter().map(move |node| (key.clone(), node)))
        .collect();

    // deterministic pairing of leftovers
    unmatched_a.sort_by(|x, y| x.0.cmp(&y.0));
    unmatched_b.sort_by(|x, y| x.0.cmp(&y.0));

    let mut by_name: BTreeMap<&str, (Vec<&XmlNode>, Vec<&XmlNode>)> = BTreeMap::new();
    for (_, node) in &unmatched_a {
        by_name.entry(node.name.as_str()).or_default().0.push(node);
    }
    for (_, node) in &unmatched_b {
        by_name.entry(node.name.as_str()).or_default().1.push(node);
    }

    by_name
        .values()
        .map(|(left, right)| {
            let paired = left.len().min(right.len());
            let changed: usize = left
                .iter()
                .zip(right.iter())
                .map(|(x, y)| CanonicalDiffer::differences(x, y))
                .sum();
            changed + (left.len() - paired) + (right.len() - paired)
        })
        .sum()
}

#[async_trait]
impl StructuralDiffer for CanonicalDiffer {
    async fn count_differences(&self, current: &Snapshot, candidate: &Snapshot) -> Result<usize> {
        Ok(Self::differences(
            current.document.root(),
            candidate.document.root(),
        ))
    }
}

/// External diff tool run as `program [args..] CURRENT CANDIDATE`; every non-empty line it
/// prints is one difference. Exit status 0 and 1 are both normal (1 meaning "differs").
#[derive(Debug, Clone)]
pub struct CommandDiffer {
    program: String,
    args: Vec<String>,
}

impl CommandDiffer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl StructuralDiffer for CommandDiffer {
    async fn count_differences(&self, current: &Snapshot, candidate: &Snapshot) -> Result<usize> {
        tracing::debug!("Running {} {:?}", self.program, self.args);
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&current.path)
            .arg(&candidate.path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LcrError::diff_tool(format!("cannot start {}: {}", self.program, e)))?;

        match output.status.code() {
            Some(0) | Some(1) => {}
            _ => {
                return Err(LcrError::diff_tool(format!(
                    "{} failed ({}): {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )))
            }
        }

        let count = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count();
        Ok(count)
    }
}

/// The differ selected by the `[differ]` configuration section.
#[derive(Debug, Clone)]
pub enum ConfiguredDiffer {
    Canonical(CanonicalDiffer),
    Command(CommandDiffer),
}

impl From<&DifferConfig> for ConfiguredDiffer {
    fn from(config: &DifferConfig) -> Self {
        match config {
            DifferConfig::Canonical => Self::Canonical(CanonicalDiffer),
            DifferConfig::Command { program, args } => {
                Self::Command(CommandDiffer::new(program.clone(), args.clone()))
            }
        }
    }
}

#[async_trait]
impl StructuralDiffer for ConfiguredDiffer {
    async fn count_differences(&self, current: &Snapshot, candidate: &Snapshot) -> Result<usize> {
        match self {
            Self::Canonical(differ) => differ.count_differences(current, candidate).await,
            Self::Command(differ) => differ.count_differences(current, candidate).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::xml::parse_tree;

    const THREE_PROVIDERS: &str = r#"<Slcr4TablesDB>
  <SlcrProvider_table>
    <SlcrProvider providerId="1" vorwahl="01013" name="Tele2"/>
    <SlcrProvider providerId="2" vorwahl="01088" name="Telefonica"/>
    <SlcrProvider providerId="3" vorwahl="01052" name="CallMobile"/>
  </SlcrProvider_table>
</Slcr4TablesDB>"#;

    fn count(a: &str, b: &str) -> usize {
        CanonicalDiffer::differences(&parse_tree(a).unwrap(), &parse_tree(b).unwrap())
    }

    #[test]
    fn test_identical_documents() {
        assert_eq!(count(THREE_PROVIDERS, THREE_PROVIDERS), 0);
    }

    #[test]
    fn test_reordered_entries_and_attributes_are_equivalent() {
        let reordered = r#"<Slcr4TablesDB><SlcrProvider_table>
<SlcrProvider name="CallMobile" providerId="3" vorwahl="01052"></SlcrProvider>
<SlcrProvider providerId="1" name="Tele2" vorwahl="01013"/>
<SlcrProvider vorwahl="01088" providerId="2" name="Telefonica"/>
</SlcrProvider_table></Slcr4TablesDB>"#;
        assert_eq!(count(THREE_PROVIDERS, reordered), 0);
    }

    #[test]
    fn test_added_entry_counts_once() {
        let four = THREE_PROVIDERS.replace(
            "</SlcrProvider_table>",
            r#"<SlcrProvider providerId="4" vorwahl="01079" name="Star79"/></SlcrProvider_table>"#,
        );
        assert_eq!(count(THREE_PROVIDERS, &four), 1);
        assert_eq!(count(&four, THREE_PROVIDERS), 1);
    }

    #[test]
    fn test_changed_attribute_counts_once() {
        let cheaper = THREE_PROVIDERS.replace("01052", "01053");
        assert_eq!(count(THREE_PROVIDERS, &cheaper), 1);
    }

    #[test]
    fn test_different_root_counts_once() {
        assert_eq!(count("<a><x/></a>", "<b><x/></b>"), 1);
    }

    #[test]
    fn test_changed_text_and_missing_table() {
        assert_eq!(count("<r><t>1</t><u/></r>", "<r><t>2</t></r>"), 2);
    }
}
