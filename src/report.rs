//! Run summary: the counters and messages spec.md §5 says a run must
//! produce, plus the `resultT`/`resultH` template rendering used for the
//! email body.

use std::fmt;

use crate::config::Config;

/// Tallies accumulated over both the incremental and cyclic passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub backed_up: u64,
    pub incremental: u64,
    pub cyclic: u64,
    pub too_recent: u64,
    pub same_old: u64,
    pub excluded: u64,
    pub permissions: u64,
    pub removed: u64,
}

impl Counters {
    pub fn total_admitted(&self) -> u64 {
        self.incremental + self.cyclic
    }
}

/// The full end-of-run report: counters, advisory messages (e.g. retired
/// volumes), and any stderr lines surfaced by the non-packer pipeline
/// stages.
#[derive(Debug, Default)]
pub struct Report {
    pub counters: Counters,
    pub messages: Vec<String>,
    pub packer_errors: Vec<String>,
    pub encryptor_errors: Vec<String>,
    pub compressor_errors: Vec<String>,
    /// Store-level catalog errors caught during the run (spec.md §4.1:
    /// caught, logged, recorded here — never fatal). Kept separate from
    /// `packer_errors` because these originate from `Catalog::delete_file`
    /// in the cyclic pass, not from anything the packer itself wrote.
    pub catalog_errors: Vec<String>,
    pub unacked: Vec<String>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.packer_errors.is_empty()
            && self.encryptor_errors.is_empty()
            && self.compressor_errors.is_empty()
            && self.catalog_errors.is_empty()
            && self.unacked.is_empty()
    }

    /// Render `config.result_t` (plain-text) substituting every `{field}`
    /// placeholder the template names.
    pub fn render_text(&self, config: &Config) -> String {
        self.render(&config.result_t)
    }

    /// Render `config.result_h` (HTML) the same way.
    pub fn render_html(&self, config: &Config) -> String {
        self.render(&config.result_h)
    }

    fn render(&self, template: &str) -> String {
        let c = &self.counters;
        template
            .replace("{backed_up}", &c.backed_up.to_string())
            .replace("{incremental}", &c.incremental.to_string())
            .replace("{cyclic}", &c.cyclic.to_string())
            .replace("{too_recent}", &c.too_recent.to_string())
            .replace("{same_old}", &c.same_old.to_string())
            .replace("{excluded}", &c.excluded.to_string())
            .replace("{permissions}", &c.permissions.to_string())
            .replace("{removed}", &c.removed.to_string())
            .replace("{messages}", &self.messages.join("\n"))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(
            f,
            "backed up {} (incremental {}, cyclic {})",
            c.backed_up, c.incremental, c.cyclic
        )?;
        writeln!(
            f,
            "skipped: too_recent={} same_old={} excluded={} permissions={} removed={}",
            c.too_recent, c.same_old, c.excluded, c.permissions, c.removed
        )?;
        for m in &self.messages {
            writeln!(f, "note: {m}")?;
        }
        for e in &self.packer_errors {
            writeln!(f, "packer: {e}")?;
        }
        for e in &self.encryptor_errors {
            writeln!(f, "encryptor: {e}")?;
        }
        for e in &self.compressor_errors {
            writeln!(f, "compressor: {e}")?;
        }
        for e in &self.catalog_errors {
            writeln!(f, "catalog: {e}")?;
        }
        for p in &self.unacked {
            writeln!(f, "unacknowledged: {p}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_template_placeholders() {
        let config = Config::defaults();
        let mut report = Report::default();
        report.counters.backed_up = 12;
        report.counters.incremental = 10;
        report.counters.cyclic = 2;
        let text = report.render_text(&config);
        assert!(text.contains("backed up: 12"));
        assert!(text.contains("incremental: 10"));
        assert!(text.contains("cyclic: 2"));
    }

    #[test]
    fn is_clean_false_when_unacked_present() {
        let mut report = Report::default();
        assert!(report.is_clean());
        report.unacked.push("/x".to_string());
        assert!(!report.is_clean());
    }

    #[test]
    fn is_clean_false_when_packer_errors_present() {
        let mut report = Report::default();
        report.packer_errors.push("foo: permission denied".to_string());
        assert!(!report.is_clean());
    }
}
