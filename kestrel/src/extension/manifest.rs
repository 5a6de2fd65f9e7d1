/// Parser for extension manifests: one `name=constructor` entry per line,
/// `#` starts a comment. This is the textual registration format carried in
/// the internal/public/compat resource tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub constructor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestIssue {
    pub line: usize,
    pub text: String,
    pub cause: String,
}

pub fn parse(text: &str) -> (Vec<ManifestEntry>, Vec<ManifestIssue>) {
    let mut entries = Vec::new();
    let mut issues = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((name, constructor))
                if !name.trim().is_empty() && !constructor.trim().is_empty() =>
            {
                entries.push(ManifestEntry {
                    name: name.trim().to_string(),
                    constructor: constructor.trim().to_string(),
                });
            }
            _ => issues.push(ManifestIssue {
                line: index + 1,
                text: line.to_string(),
                cause: "expected name=constructor".to_string(),
            }),
        }
    }
    (entries, issues)
}
