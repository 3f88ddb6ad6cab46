//! Rendering helpers (markdown) for human-readable artifacts.

use bakery_types::{RunReport, Structure, Tag, join_tags};
use std::collections::BTreeMap;

pub fn render_structure_md(structure: &Structure) -> String {
    let mut out = String::new();
    out.push_str(&format!("# bakery transform: {}\n\n", structure.name()));
    out.push_str(&format!("- Kind: `{}`\n", structure.kind()));
    out.push_str(&format!("- Inputs: {}\n", tag_list(structure.input_tags())));
    out.push_str(&format!("- Outputs: {}\n", tag_list(structure.output_tags())));
    out.push_str(&format!("- Leaves: {}\n\n", structure.leaf_count()));

    out.push_str("## Steps\n\n");
    render_node(&mut out, structure, 0);
    out
}

fn render_node(out: &mut String, node: &Structure, depth: usize) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&format!(
        "- `{}` ({}) {} → {}",
        node.name(),
        node.kind(),
        arrow_side(node.input_tags()),
        arrow_side(node.output_tags())
    ));
    if let Structure::Map {
        input_mapping,
        output_mapping,
        ..
    } = node
    {
        out.push_str(&format!(
            " [in: {}; out: {}]",
            mapping(input_mapping),
            mapping(output_mapping)
        ));
    }
    out.push('\n');
    for child in node.children() {
        render_node(out, child, depth + 1);
    }
}

pub fn render_report_md(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("# bakery run\n\n");
    out.push_str(&format!("- Run: `{}`\n", report.run_id));
    out.push_str(&format!("- Transform: `{}`\n", report.transform));
    out.push_str(&format!("- State: `{}`\n", report.state));
    out.push_str(&format!("- Started: {}\n", report.started_at.to_rfc3339()));
    if let Some(ms) = report.duration_ms {
        out.push_str(&format!("- Duration: {} ms\n", ms));
    }
    out.push('\n');

    out.push_str("## Outputs\n\n");
    if report.outputs.is_empty() {
        out.push_str("_No outputs committed._\n");
    } else {
        out.push_str("| Tag | Path | Bytes | SHA-256 |\n");
        out.push_str("|---|---|---|---|\n");
        for output in &report.outputs {
            let tag = match output.member {
                Some(index) => format!("{}[{index}]", output.tag),
                None => output.tag.to_string(),
            };
            out.push_str(&format!(
                "| `{}` | `{}` | {} | `{}` |\n",
                tag,
                output.path,
                output.bytes,
                short_sha(&output.sha256)
            ));
        }
    }

    if let Some(error) = &report.error {
        out.push_str("\n## Error\n\n");
        out.push_str(&format!("- Category: `{}`\n", error.category));
        out.push_str(&format!("- Kind: `{}`\n\n", error.kind));
        out.push_str(&format!("{}\n", error.message));
    }

    out
}

fn tag_list(tags: &[Tag]) -> String {
    if tags.is_empty() {
        return "_none_".to_string();
    }
    tags.iter()
        .map(|tag| format!("`{tag}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn arrow_side(tags: &[Tag]) -> String {
    if tags.is_empty() {
        "∅".to_string()
    } else {
        join_tags(tags)
    }
}

fn mapping(map: &BTreeMap<Tag, Tag>) -> String {
    map.iter()
        .map(|(from, to)| format!("{from}→{to}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bakery_types::{CommittedOutput, RunFailure, RunState};
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;

    fn leaf(name: &str, input: &str, output: &str) -> Structure {
        Structure::Leaf {
            name: name.to_string(),
            input_tags: vec![Tag::from(input)],
            output_tags: vec![Tag::from(output)],
        }
    }

    #[test]
    fn structure_renders_nested_list() {
        let structure = Structure::Sequence {
            name: "shout".to_string(),
            input_tags: vec![Tag::from("x")],
            output_tags: vec![Tag::from("z")],
            steps: vec![
                leaf("upper", "x", "y"),
                Structure::Map {
                    name: "exclaim".to_string(),
                    input_tags: vec![Tag::from("y")],
                    output_tags: vec![Tag::from("z")],
                    input_mapping: BTreeMap::from([(Tag::from("in"), Tag::from("y"))]),
                    output_mapping: BTreeMap::from([(Tag::from("out"), Tag::from("z"))]),
                    base_step: Box::new(leaf("exclaim", "in", "out")),
                },
            ],
        };

        let md = render_structure_md(&structure);
        assert_eq!(
            md,
            "# bakery transform: shout\n\n\
             - Kind: `sequence`\n\
             - Inputs: `x`\n\
             - Outputs: `z`\n\
             - Leaves: 2\n\n\
             ## Steps\n\n\
             - `shout` (sequence) x → z\n\
             \x20 - `upper` (leaf) x → y\n\
             \x20 - `exclaim` (map) y → z [in: in→y; out: out→z]\n\
             \x20   - `exclaim` (leaf) in → out\n"
        );
    }

    #[test]
    fn completed_report_lists_outputs() {
        let mut report = RunReport::new("run-1", "shout");
        report.state = RunState::Completed;
        report.duration_ms = Some(7);
        report.outputs.push(CommittedOutput {
            tag: Tag::from("z"),
            member: None,
            path: Utf8PathBuf::from("out.txt"),
            bytes: 6,
            sha256: "2cf24dba5fb0a30e26e83b2ac5b9e29e".to_string(),
        });
        report.outputs.push(CommittedOutput {
            tag: Tag::fileset("thumbs"),
            member: Some(1),
            path: Utf8PathBuf::from("b.png"),
            bytes: 3,
            sha256: "abc".to_string(),
        });

        let md = render_report_md(&report);
        assert!(md.contains("- State: `completed`"));
        assert!(md.contains("- Duration: 7 ms"));
        assert!(md.contains("| `z` | `out.txt` | 6 | `2cf24dba5fb0` |"));
        assert!(md.contains("| `fileset::thumbs[1]` | `b.png` | 3 | `abc` |"));
        assert!(!md.contains("## Error"));
    }

    #[test]
    fn rolled_back_report_shows_error() {
        let mut report = RunReport::new("run-2", "shout");
        report.state = RunState::RolledBack;
        report.error = Some(RunFailure {
            category: "execution".to_string(),
            kind: "ScriptError".to_string(),
            message: "exclaim (inputs [y], outputs [z]) failed: boom".to_string(),
        });

        let md = render_report_md(&report);
        assert!(md.contains("_No outputs committed._"));
        assert!(md.contains("- Kind: `ScriptError`"));
        assert!(md.contains("failed: boom"));
        assert!(md.contains("`rolled_back`"));
    }
}
