//! System prompt and fixed UI strings for the contract assistant.

use once_cell::sync::Lazy;

pub const APP_TITLE: &str = "PCFT Contract Assistant";
pub const APP_SUBTITLE: &str = "Expert advisor for Pierce College faculty & union members";

pub const WELCOME_MESSAGE: &str = "Welcome, colleague. I am your PCFT Contract Assistant. \
How can I help you understand your rights, workload, or the grievance procedure today?";

/// Appended to the contract context when the live audio session opens, so
/// spoken answers stay short and plain.
pub const LIVE_MODE_SUFFIX: &str =
    "\nYou are in LIVE MODE. Provide short, concise verbal answers. Use plain language for audio clarity.";

/// The knowledge base: contract articles, MOUs, and contacts the assistant
/// may cite. Sent as the system instruction on every request.
pub const CONTRACT_CONTEXT: &str = r#"
PIERCE COLLEGE FEDERATION OF TEACHERS (PCFT) CONTRACT DOCUMENTS (2024-2027)

EXECUTIVE BOARD CONTACTS:
- PCFT President: president@pcft.wa.aft.org
- PCFT Vice-President: vicepresident@pcft.wa.aft.org
- PCFT Treasurer: treasurer@pcft.wa.aft.org

MEMORANDA OF UNDERSTANDING (MOUs):
1. High Demand/High Wage (2025-2026): $20,000 annual stipend for FT faculty in specific fields.
2. Nursing Faculty (2025-2026): $28,200 annual stipend for FT nursing faculty.
3. Digital Accessibility (Title II): $500 stipend or SIPable goal for course remediation by April 6, 2026.

NEGOTIATED AGREEMENT (2024-2027) CORE ARTICLES:

Article 7: Workload and Calendar
- Section 7.1: Instructional Load. Full-time load is 45 annual credit hours average per academic year.
- Section 7.2: Preparations. Faculty shall not be assigned more than three (3) different course preparations per quarter without prior consultation and mutual agreement.
- Section 7.3: Class Size. Maximum class size is 35 for grounded courses and 30 for online/eLearning courses.

Article 16: Grievance Procedure
- Section 16.1: Definition. A grievance is a claim by the Federation or an employee that there has been a violation, misinterpretation, or misapplication of this Agreement.
- Step 1 (Informal): Oral discussion with the immediate supervisor (Dean) within twenty (20) business days.
- Step 2 (Formal): Written grievance to the Vice President within ten (10) business days.
  - Required Documentation: Facts, Article/Section violated, and Remedy sought.

SYSTEM INSTRUCTIONS:
- You are the PCFT Contract Assistant.
- Always cite specific articles and sections.
- If asked for contacts, provide the President, Vice-President, and Treasurer emails listed above.
"#;

/// A sidebar shortcut: a short label and the full question it expands to.
pub struct Shortcut {
    pub label: &'static str,
    pub question: &'static str,
}

/// Contract-knowledge questions offered in the shell.
pub const CONTRACT_SHORTCUTS: &[Shortcut] = &[
    Shortcut {
        label: "Faculty Load & Preps",
        question: "What is the faculty load, including maximum preparations and credit hours?",
    },
    Shortcut {
        label: "Class Size Limits",
        question: "What are the maximum class sizes for grounded and online courses?",
    },
    Shortcut {
        label: "Grievance Procedure",
        question: "Explain the grievance procedure as outlined in the PCFT collective bargaining agreement, detailing the steps, time limits, and required documentation.",
    },
    Shortcut {
        label: "Sick Leave Policy",
        question: "How does sick leave work under the contract?",
    },
    Shortcut {
        label: "RIF Layoff Order",
        question: "What is the RIF layoff order for faculty?",
    },
];

/// MOU and stipend questions offered in the shell.
pub const STIPEND_SHORTCUTS: &[Shortcut] = &[
    Shortcut {
        label: "High Demand Stipend",
        question: "Explain the High Demand/High Wage MOU",
    },
    Shortcut {
        label: "Nursing Stipend",
        question: "What are the details of the Nursing Faculty MOU?",
    },
    Shortcut {
        label: "Digital Accessibility",
        question: "Tell me about the Title II Accessibility stipend.",
    },
];

/// System instruction for the live session.
pub static LIVE_SYSTEM_PROMPT: Lazy<String> =
    Lazy::new(|| format!("{}{}", CONTRACT_CONTEXT, LIVE_MODE_SUFFIX));
