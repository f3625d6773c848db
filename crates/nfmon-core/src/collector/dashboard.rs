//! Static reference information served on a collector's dashboard

use serde::Serialize;

use crate::models::NfType;

/// What a network function does and which of its metrics are worth watching
#[derive(Debug, Clone, Serialize)]
pub struct NfProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub key_interfaces: &'static [&'static str],
    pub main_functions: &'static [&'static str],
    pub metric_examples: &'static [&'static str],
}

pub fn nf_profile(nf_type: NfType) -> NfProfile {
    match nf_type {
        NfType::Amf => NfProfile {
            name: "Access and Mobility Management Function",
            description: "Terminates NAS signalling and handles UE registration, reachability and mobility",
            key_interfaces: &["N1 (UE)", "N2 (gNB)", "N8 (UDM)", "N11 (SMF)", "N12 (AUSF)"],
            main_functions: &[
                "Registration management",
                "Connection management",
                "Mobility management",
                "Access authentication",
            ],
            metric_examples: &[
                "fivegs_amffunction_rm_reginitreq",
                "fivegs_amffunction_rm_reginitsucc",
                "fivegs_amffunction_amf_authreq",
                "ran_ue",
                "gnb",
                "amf_session",
            ],
        },
        NfType::Smf => NfProfile {
            name: "Session Management Function",
            description: "Establishes and manages PDU sessions and controls the user plane",
            key_interfaces: &["N4 (UPF)", "N7 (PCF)", "N10 (UDM)", "N11 (AMF)"],
            main_functions: &[
                "PDU session establishment",
                "UE IP address allocation",
                "UPF selection",
                "QoS flow control",
            ],
            metric_examples: &[
                "fivegs_smffunction_sm_sessionnbr",
                "fivegs_smffunction_sm_pdusessioncreationreq",
                "pfcp_sessions_active",
                "ues_active",
                "gtp_new_node",
            ],
        },
        NfType::Pcf => NfProfile {
            name: "Policy Control Function",
            description: "Provides policy rules for access, mobility and session management",
            key_interfaces: &["N5 (AF)", "N7 (SMF)", "N15 (AMF)"],
            main_functions: &[
                "AM policy association",
                "SM policy association",
                "Charging control",
            ],
            metric_examples: &[
                "fivegs_pcffunction_pa_policyamassoreq",
                "fivegs_pcffunction_pa_policyamassosucc",
                "fivegs_pcffunction_pa_policysmassoreq",
                "fivegs_pcffunction_pa_policysmassosucc",
            ],
        },
        NfType::Upf => NfProfile {
            name: "User Plane Function",
            description: "Forwards user traffic between the radio network and data networks",
            key_interfaces: &["N3 (gNB)", "N4 (SMF)", "N6 (DN)", "N9 (UPF)"],
            main_functions: &[
                "Packet routing and forwarding",
                "QoS enforcement",
                "Usage reporting",
            ],
            metric_examples: &[
                "fivegs_ep_n3_gtp_indatapktn3upf",
                "fivegs_ep_n3_gtp_outdatapktn3upf",
                "fivegs_upffunction_upf_sessionnbr",
                "fivegs_upffunction_sm_n4sessionestabreq",
            ],
        },
        NfType::Mme => NfProfile {
            name: "Mobility Management Entity",
            description: "Control-plane node of the EPC handling attach, paging and bearer setup",
            key_interfaces: &["S1-MME (eNB)", "S6a (HSS)", "S11 (SGW-C)"],
            main_functions: &[
                "Attach and detach",
                "Tracking area updates",
                "Bearer management",
                "Paging",
            ],
            metric_examples: &["mme_session", "enb_ue", "enb"],
        },
        NfType::Pcrf => NfProfile {
            name: "Policy and Charging Rules Function",
            description: "Decides policy and charging rules for EPC bearers",
            key_interfaces: &["Gx (PGW)", "Rx (AF)"],
            main_functions: &["Policy decisions", "Flow-based charging control"],
            metric_examples: &[],
        },
    }
}
