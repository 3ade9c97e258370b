use anyhow::Result;
use ncdot_core::describe::{detail_card, format_table_time};
use ncdot_core::schema::ReportEntity;
use ncdot_core::settings::Settings;
use ncdot_core::store::ReportStore;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::debug;

pub struct DigestPaths {
    pub root: PathBuf,
    pub index_dir: PathBuf,
    pub closures_dir: PathBuf,
}

impl DigestPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            index_dir: root.join("00_Index"),
            closures_dir: root.join("Closures"),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.index_dir)?;
        fs::create_dir_all(&self.closures_dir)?;
        Ok(())
    }
}

/// Writes the closures index, one note per visible closure and the camera
/// index. Returns the number of closure notes written.
pub fn build_digest(store: &ReportStore, root: &Path, now: OffsetDateTime) -> Result<usize> {
    let paths = DigestPaths::new(root);
    paths.ensure()?;
    let settings = store.settings();

    // 1) Closure notes + index table
    let mut index_lines: Vec<String> = Vec::new();
    index_lines.push("# MOC - Closures".to_string());
    index_lines.push(String::new());
    index_lines.push("This index is generated. Do not edit manually.".to_string());
    index_lines.push(String::new());
    index_lines.push(format!("_{}_", store.summary(now)));
    index_lines.push(String::new());

    let visible: Vec<&ReportEntity> = store.visible_reports(now).collect();
    if visible.is_empty() {
        index_lines.push("_No closures to show._".to_string());
    } else {
        index_lines.push("| Archived | Road | Desc | Start | End | Updated |".to_string());
        index_lines.push("|---|---|---|---|---|---|".to_string());
        for report in &visible {
            write_closure_note(&paths, report, settings)?;
            index_lines.push(table_row(report, settings.show_city_county_check));
        }
    }

    let moc_path = paths.index_dir.join("MOC - Closures.md");
    fs::write(moc_path, index_lines.join("\n"))?;

    // 2) Camera index
    let mut camera_lines: Vec<String> = Vec::new();
    camera_lines.push("# MOC - Cameras".to_string());
    camera_lines.push(String::new());
    camera_lines.push("This index is generated. Do not edit manually.".to_string());
    camera_lines.push(String::new());

    let mut camera_count = 0;
    for camera in store.visible_cameras() {
        let name = camera.display_name.clone().unwrap_or_else(|| camera.id.clone());
        let line = match &camera.image_url {
            Some(url) => format!("- [{name}]({url}) ({:.5}, {:.5})", camera.latitude, camera.longitude),
            None => format!("- {name} ({:.5}, {:.5})", camera.latitude, camera.longitude),
        };
        camera_lines.push(line);
        camera_count += 1;
    }
    if camera_count == 0 {
        camera_lines.push("_No cameras to show._".to_string());
    }

    let camera_moc_path = paths.index_dir.join("MOC - Cameras.md");
    fs::write(camera_moc_path, camera_lines.join("\n"))?;

    debug!(closures = visible.len(), cameras = camera_count, "Digest written");
    Ok(visible.len())
}

fn table_row(report: &ReportEntity, show_city: bool) -> String {
    let attrs = &report.attributes;
    let desc = if show_city {
        format!(
            "{} ({}) {}",
            attrs.city.as_deref().unwrap_or_default(),
            attrs.county_name.as_deref().unwrap_or_default(),
            attrs.condition
        )
    } else {
        attrs.condition.clone()
    };
    format!(
        "| {} | [[Closures/{}\\|{}]] | {} | {} | {} | {} |",
        if report.archived { "x" } else { " " },
        note_stem(&report.id),
        escape_cell(&attrs.road),
        escape_cell(&desc),
        format_table_time(attrs.start.as_ref()),
        format_table_time(attrs.end.as_ref()),
        format_table_time(Some(&attrs.last_update)),
    )
}

/// Feed ids are free text; anything outside `[A-Za-z0-9_-]` becomes `_` so a
/// note can never land outside `Closures/`.
fn note_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "_".to_string() } else { stem }
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

fn write_closure_note(paths: &DigestPaths, report: &ReportEntity, settings: &Settings) -> Result<()> {
    let note_path = paths.closures_dir.join(format!("{}.md", note_stem(&report.id)));
    let attrs = &report.attributes;
    let card = detail_card(report, settings);

    // Minimal frontmatter for later search/sorting
    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("id: {}\n", report.id));
    md.push_str(&format!("condition: {}\n", attrs.condition));
    md.push_str(&format!("road: {}\n", attrs.road));
    md.push_str(&format!("last_update: {}\n", attrs.last_update.text));
    md.push_str(&format!("archived: {}\n", report.archived));
    md.push_str(&format!("latitude: {}\n", attrs.latitude));
    md.push_str(&format!("longitude: {}\n", attrs.longitude));
    if let Some(polyline) = &attrs.polyline {
        md.push_str("polyline: |\n");
        md.push_str(&indent_yaml_block(polyline));
    }
    md.push_str("---\n\n");

    md.push_str(&format!("# {}\n\n", card.title));
    if let Some(banner) = card.banner {
        md.push_str(&format!("> **{banner}**\n\n"));
    }

    md.push_str("## Details\n");
    for (label, value) in &card.fields {
        md.push_str(&format!("- {label}: {value}\n"));
    }
    md.push('\n');

    md.push_str("## RTC Description\n");
    md.push_str(&format!("`{}`\n\n", card.rtc_description));

    md.push_str("## Links\n");
    md.push_str(&format!("- {}\n", card.url));

    fs::write(note_path, md)?;
    Ok(())
}

fn indent_yaml_block(s: &str) -> String {
    // YAML block scalar requires indentation
    let mut out = String::new();
    for line in s.lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_block_is_indented() {
        assert_eq!(indent_yaml_block("a\nb"), "  a\n  b\n");
    }

    #[test]
    fn note_names_stay_inside_the_closures_dir() {
        assert_eq!(note_stem("4242"), "4242");
        assert_eq!(note_stem("../../etc/passwd"), "______etc_passwd");
        assert_eq!(note_stem("a/b"), "a_b");
        assert_eq!(note_stem(""), "_");
    }

    #[test]
    fn pipes_are_escaped_in_cells() {
        assert_eq!(escape_cell("A|B"), "A\\|B");
    }
}
