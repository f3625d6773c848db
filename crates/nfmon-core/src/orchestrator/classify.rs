//! Mapping components onto network function roles

use crate::models::{Component, NfType};

/// Decides which components get a fetch-and-reexpose collector
pub trait NfClassifier: Send + Sync {
    fn classify(&self, component: &Component) -> Option<NfType>;
}

/// Classifies by component name, falling back to the type tag
#[derive(Debug, Clone, Copy, Default)]
pub struct NameClassifier;

const NAME_MARKERS: &[(&str, NfType)] = &[
    ("amf", NfType::Amf),
    ("smf", NfType::Smf),
    ("pcrf", NfType::Pcrf),
    ("pcf", NfType::Pcf),
    ("upf", NfType::Upf),
    ("mme", NfType::Mme),
];

impl NfClassifier for NameClassifier {
    fn classify(&self, component: &Component) -> Option<NfType> {
        let name = component.name.to_ascii_lowercase();
        if let Some((_, nf)) = NAME_MARKERS.iter().find(|(marker, _)| name.contains(marker)) {
            return Some(*nf);
        }

        classify_type_tag(&component.component_type)
    }
}

/// Whole role tags that identify a network function on their own
///
/// Shared tags such as "5G-Control-Plane" say nothing about which function
/// a component is, so they only classify through the name.
const ROLE_TAGS: &[(&str, NfType)] = &[
    ("access-and-mobility", NfType::Amf),
    ("access-and-mobility-management", NfType::Amf),
    ("session-management", NfType::Smf),
    ("5g-session-management", NfType::Smf),
    ("5g-policy", NfType::Pcf),
    ("4g-policy", NfType::Pcrf),
    ("policy-charging", NfType::Pcrf),
    ("5g-user-plane", NfType::Upf),
    ("mobility-management-entity", NfType::Mme),
];

fn classify_type_tag(tag: &str) -> Option<NfType> {
    let normalized: String = tag
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    ROLE_TAGS
        .iter()
        .find(|(role, _)| *role == normalized)
        .map(|(_, nf)| *nf)
}
