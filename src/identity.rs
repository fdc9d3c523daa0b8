use quick_xml::{events::Event, Reader};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Where a mod folder was discovered. The label doubles as the
/// per-source subdirectory name inside a backup generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModSource {
    Workshop,
    Local,
}

impl ModSource {
    pub fn label(self) -> &'static str {
        match self {
            ModSource::Workshop => "Workshop",
            ModSource::Local => "Local",
        }
    }
}

/// One installed mod folder as seen by a backup run. Recomputed on
/// every scan, never persisted. `id` is not globally unique: the same
/// id can show up under more than one source and each occurrence is
/// kept as its own entry.
#[derive(Debug, Clone)]
pub struct ModIdentity {
    pub id: String,
    pub path: PathBuf,
    pub source: ModSource,
    pub display_name: String,
}

/// Replaces characters that cannot appear in file or directory names
/// with `_`. Idempotent.
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

pub fn resolve(raw_folder_name: &str, content_root: &Path, source: ModSource) -> ModIdentity {
    let id = sanitize_name(raw_folder_name);
    let base = about_name(content_root).unwrap_or_else(|| raw_folder_name.to_string());
    ModIdentity {
        id,
        path: content_root.to_path_buf(),
        source,
        display_name: format!("{base} ({})", source.label()),
    }
}

/// Reads the `<name>` element from `About/About.xml` under the mod
/// root. Missing file, malformed XML and empty names all yield `None`.
pub fn about_name(mod_root: &Path) -> Option<String> {
    let about_path = mod_root.join("About").join("About.xml");
    let bytes = fs::read(about_path).ok()?;
    parse_about_name(&bytes)
}

fn parse_about_name(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut in_name = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                in_name = depth == 2 && e.name().as_ref() == b"name";
            }
            Ok(Event::Text(e)) => {
                if in_name {
                    if let Ok(text) = e.unescape() {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            return Some(trimmed.to_string());
                        }
                    }
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                in_name = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_every_illegal_character() {
        assert_eq!(sanitize_name(r#"a\b/c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_name("123456789"), "123456789");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = ["mod?name", "already_clean", r"a\b:c", ""];
        for input in inputs {
            let once = sanitize_name(input);
            assert_eq!(sanitize_name(&once), once);
        }
    }

    #[test]
    fn about_name_reads_name_element() {
        let xml = br#"<?xml version="1.0" encoding="utf-8"?>
<ModMetaData>
  <name>  Foo Mod  </name>
  <author>someone</author>
</ModMetaData>"#;
        assert_eq!(parse_about_name(xml), Some("Foo Mod".to_string()));
    }

    #[test]
    fn about_name_ignores_nested_name_elements() {
        let xml = br#"<ModMetaData>
  <authors><name>not the mod</name></authors>
  <name>Real Name</name>
</ModMetaData>"#;
        assert_eq!(parse_about_name(xml), Some("Real Name".to_string()));
    }

    #[test]
    fn about_name_fails_soft() {
        assert_eq!(parse_about_name(b"<broken"), None);
        assert_eq!(parse_about_name(b"<root><name></name></root>"), None);
        assert_eq!(parse_about_name(b"<root><other>x</other></root>"), None);
    }

    #[test]
    fn resolve_falls_back_to_folder_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let identity = resolve("294100?x", dir.path(), ModSource::Local);
        assert_eq!(identity.id, "294100_x");
        assert_eq!(identity.display_name, "294100?x (Local)");
    }

    #[test]
    fn resolve_prefers_about_xml_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let about = dir.path().join("About");
        fs::create_dir_all(&about).expect("about dir");
        fs::write(about.join("About.xml"), "<ModMetaData><name>Foo</name></ModMetaData>")
            .expect("write about");
        let identity = resolve("123", dir.path(), ModSource::Workshop);
        assert_eq!(identity.display_name, "Foo (Workshop)");
        assert_eq!(identity.id, "123");
    }
}
