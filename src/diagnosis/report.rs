use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn parse(value: &str) -> Option<Self> {
        let lowered = value.to_lowercase();
        let word = lowered
            .split(|c: char| !c.is_alphabetic())
            .find(|w| !w.is_empty())?;
        match word {
            "low" | "mild" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" | "severe" => Some(Severity::High),
            _ => None,
        }
    }
}

/// Best-effort view of the seven sections the instruction asks for.
/// The raw text stays authoritative; this is only filled when the model
/// followed the labelled layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosisReport {
    pub plant_name: Option<String>,
    pub disease: Option<String>,
    pub severity: Option<Severity>,
    pub cause: Option<String>,
    pub treatment: Option<String>,
    pub remedies: Option<String>,
    pub prevention: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    PlantName,
    Disease,
    Severity,
    Cause,
    Treatment,
    Remedies,
    Prevention,
}

const LABELS: &[(&str, Section)] = &[
    ("plant name", Section::PlantName),
    ("plant", Section::PlantName),
    ("disease name", Section::Disease),
    ("disease", Section::Disease),
    ("severity", Section::Severity),
    ("likely cause", Section::Cause),
    ("cause", Section::Cause),
    ("step-by-step treatment", Section::Treatment),
    ("treatment", Section::Treatment),
    ("organic/natural remedies", Section::Remedies),
    ("organic remedies", Section::Remedies),
    ("natural remedies", Section::Remedies),
    ("remedies", Section::Remedies),
    ("prevention tips", Section::Prevention),
    ("prevention", Section::Prevention),
];

/// Splits `text` on recognised section labels. Returns `None` unless at
/// least the plant and disease were found.
pub fn extract_report(text: &str) -> Option<DiagnosisReport> {
    let mut sections: Vec<(Section, Vec<String>)> = Vec::new();

    for line in text.lines() {
        if let Some((section, rest)) = parse_header(line) {
            sections.push((section, vec![rest.to_string()]));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line.trim().to_string());
        }
    }

    let mut report = DiagnosisReport::default();
    for (section, body) in sections {
        let value = body.join("\n").trim().to_string();
        if value.is_empty() {
            continue;
        }
        // First occurrence wins.
        match section {
            Section::PlantName => report.plant_name.get_or_insert(value),
            Section::Disease => report.disease.get_or_insert(value),
            Section::Cause => report.cause.get_or_insert(value),
            Section::Treatment => report.treatment.get_or_insert(value),
            Section::Remedies => report.remedies.get_or_insert(value),
            Section::Prevention => report.prevention.get_or_insert(value),
            Section::Severity => {
                if report.severity.is_none() {
                    report.severity = Severity::parse(&value);
                }
                continue;
            }
        };
    }

    if report.plant_name.is_some() && report.disease.is_some() {
        Some(report)
    } else {
        None
    }
}

fn parse_header(line: &str) -> Option<(Section, &str)> {
    let (label, rest) = line.split_once(':')?;

    let label = label
        .trim()
        .trim_start_matches(|c: char| c == '#' || c == '*' || c == '-' || c.is_whitespace())
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['.', ')'])
        .replace('*', "")
        .trim()
        .to_lowercase();

    let section = LABELS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, section)| *section)?;

    Some((section, rest.trim_start_matches('*').trim()))
}
