//! System prompt assembly for a project's voice agent.
//!
//! `build_prompt` is a pure function of project state: the same project
//! always produces byte-identical text, so re-provisioning is idempotent.

use crate::campaign::model::{Dealer, Project};

/// Built-in section texts, used when a project has no override.
pub mod defaults {
    pub const CALL_CONTEXT: &str = "CURRENT CALL: You are speaking to {{customerName}} on {{customerNumber}}. \
Greet them by name when you have one (for example 'Hi {{customerName}}'); otherwise just say 'Hi' or 'Hello'.";

    pub const IDENTITY: &str = "IDENTITY: You are part of this business. Talk about its hours, location, services \
and contact details as 'we', 'our' and 'us'. Never describe the business as 'they' or 'the company'.";

    pub const ENDING_CALL: &str = "ENDING THE CALL: When the person says goodbye or that they need to go, give a short, \
natural sign-off (for example 'Thanks for your time, goodbye') and end the call. Do not keep talking. \
A request to hang up ends this call only; it is not a request to be removed from the list.";

    pub const COMPLIANCE: &str = "COMPLIANCE (POPIA): If the person asks not to be called again or to be removed \
from the list, acknowledge it and confirm they will not be contacted again. Do not confuse this with simply \
ending the current call.";

    pub const VOICE_OUTPUT: &str = "VOICE OUTPUT: Everything you write is spoken by a voice engine that reads digits \
one by one, so spell numbers out as words.\n\
- Prices: 'two hundred and eighty-nine thousand nine hundred and ninety-five rand', never 'R289995'.\n\
- Years: 'twenty twenty-two', never '2022'.\n\
- Specs and units: 'seventy kilowatts', 'two litre', 'two point five litre', 'four by four'.\n\
- Model letters: expand single letters that would be misread ('350 d' becomes '350 diesel'; 'A7' becomes 'A seven').\n\
- Phone numbers: read slowly in groups with short pauses, as if dictating.\n\
- Email addresses: say 'at' for @ and 'dot cee oh dot zed ay' for .co.za.\n\
- Addresses: give the street number, street and area only unless asked for more, and follow any pronunciation notes.\n\
Never output raw digits, symbols or abbreviations in anything that will be spoken.";

    pub const CLARIFICATION: &str = "CLARIFICATION: Speech is sometimes misheard. If something the customer said does \
not make sense in context, do not guess: politely ask them to repeat it or confirm what you think they meant \
(for example 'Sorry, did you mean the handling?'). Never pretend to have understood.";

    pub const BUSINESS_CONTEXT_HEADER: &str =
        "BUSINESS CONTEXT (use this to answer questions about the business, its location and services):";

    pub const SCHEDULING: &str = "SCHEDULING: If the customer proposes a time outside business hours, say we are not \
open then, state the opening hours from the business context clearly (opening time first, closing time second), \
and ask which day and time suits them. If they give a bare number such as '9', do not assume PM; confirm AM or PM, \
or treat it as AM when that falls within opening hours and confirm it back.";

    pub const CONTEXT_HEADER: &str = "LISTING CONTEXT (the customer enquired about this listing; use it to introduce \
the item and answer questions about specs, price, features, handling, comfort and safety). Search the text below \
before answering and quote or paraphrase anything relevant. Only say a detail is unavailable when the text has \
nothing on that topic, and never invent one.";

    pub const CONTEXT_REFERENCE: &str = "NAMING THE ITEM: Use the full name (year, make, model, variant) at most twice: \
once in the introduction and once when confirming a booking. Otherwise use a short form such as the model name, \
'it' or 'this one'.";

    pub const CONTEXT_INTRO: &str = "INTRODUCTION (after the customer confirms who they are): one short line naming the \
item, without listing specs. Then offer a short summary of its features, answer any questions, and only offer a \
viewing or test drive when the conversation naturally allows it, not after every answer.";

    pub const CONTEXT_PLACEHOLDER: &str = "PLACEHOLDERS: Replace placeholders such as [year], [make] and [model] in \
your script with the real values from the listing context. Never say the placeholder words themselves.";

    /// Used when every section is empty.
    pub const FALLBACK: &str = "You are a professional phone agent. Be concise and helpful.";
}

/// Resolve an override: a present value (trimmed) wins, else the default.
fn section<'a>(override_text: Option<&'a str>, default: &'a str) -> &'a str {
    override_text.unwrap_or(default).trim()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Assemble the system prompt for `project`.
///
/// Sections, in order: call context, identity, call ending, compliance,
/// voice output, clarification; business context + scheduling (if the
/// project has business context); listing context + reference/intro/
/// placeholder guidance (if enrichment text exists); the agent identity
/// clause; operator instructions; goal; tone; numbered questions.
pub fn build_prompt(project: &Project) -> String {
    let o = &project.prompt_overrides;
    let mut parts: Vec<String> = Vec::new();

    let boilerplate = [
        (o.call_context.as_deref(), defaults::CALL_CONTEXT),
        (o.identity.as_deref(), defaults::IDENTITY),
        (o.ending_call.as_deref(), defaults::ENDING_CALL),
        (o.compliance.as_deref(), defaults::COMPLIANCE),
        (o.voice_output.as_deref(), defaults::VOICE_OUTPUT),
        (None, defaults::CLARIFICATION),
    ];
    parts.extend(boilerplate.iter().map(|(ov, d)| section(*ov, d).to_string()));

    if let Some(business) = non_blank(project.business_context.as_deref()) {
        parts.push(section(o.business_context_header.as_deref(), defaults::BUSINESS_CONTEXT_HEADER).to_string());
        parts.push(business.to_string());
        parts.push(section(o.scheduling.as_deref(), defaults::SCHEDULING).to_string());
    }

    if let Some(context) = non_blank(project.full_context_text.as_deref()) {
        parts.push(section(o.context_header.as_deref(), defaults::CONTEXT_HEADER).to_string());
        parts.push(context.to_string());
        let guidance = [
            (o.context_reference.as_deref(), defaults::CONTEXT_REFERENCE),
            (o.context_intro.as_deref(), defaults::CONTEXT_INTRO),
            (o.context_placeholder.as_deref(), defaults::CONTEXT_PLACEHOLDER),
        ];
        parts.extend(guidance.iter().map(|(ov, d)| section(*ov, d).to_string()));
    }

    if let Some(clause) = identity_clause(project) {
        parts.push(clause);
    }

    if let Some(instructions) = non_blank(project.agent_instructions.as_deref()) {
        parts.push(instructions.to_string());
    }
    if let Some(goal) = non_blank(project.goal.as_deref()) {
        parts.push(format!("\nGOAL: {goal}"));
    }
    if let Some(tone) = non_blank(project.tone.as_deref()) {
        parts.push(format!("\nTONE: {tone}"));
    }

    let questions: Vec<&str> = project
        .questions
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .collect();
    if !questions.is_empty() {
        parts.push("\nQUESTIONS TO COVER (work these into the conversation naturally):".to_string());
        parts.extend(
            questions
                .iter()
                .enumerate()
                .map(|(i, q)| format!("{}. {q}", i + 1)),
        );
    }

    let prompt = parts.join("\n");
    let prompt = prompt.trim();
    if prompt.is_empty() {
        defaults::FALLBACK.to_string()
    } else {
        prompt.to_string()
    }
}

fn identity_clause(project: &Project) -> Option<String> {
    let mut clause: Vec<String> = Vec::new();
    if let Some(name) = non_blank(project.agent_name.as_deref()) {
        clause.push(format!("You are {name}."));
    }
    if let Some(company) = non_blank(project.agent_company.as_deref()) {
        clause.push(format!("You are calling on behalf of {company}."));
    }
    if let Some(number) = non_blank(project.agent_number.as_deref()) {
        clause.push(format!("The number you are calling from is {number}."));
    }
    (!clause.is_empty()).then(|| clause.join(" "))
}

/// Append a dealership contact block to a project's business context.
///
/// Only lines with values are emitted; with no contact details the base text
/// is returned unchanged (trimmed).
pub fn enrich_business_context(base: Option<&str>, dealer: &Dealer) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(base) = non_blank(base) {
        lines.push(base.to_string());
    }

    let contact = [
        ("Address", dealer.address.as_deref()),
        ("Phone", dealer.phone_number.as_deref()),
        ("Email", dealer.email.as_deref()),
        ("Operating hours", dealer.operation_hours.as_deref()),
    ];
    let present: Vec<(&str, &str)> = contact
        .iter()
        .filter_map(|(label, v)| non_blank(*v).map(|v| (*label, v)))
        .collect();

    if !present.is_empty() {
        lines.push(String::new());
        lines.push(
            "DEALERSHIP CONTACT DETAILS (give these when asked for the address, phone, email, \
             or where to come for a viewing or test drive):"
                .to_string(),
        );
        lines.extend(present.iter().map(|(label, v)| format!("{label}: {v}")));

        if let Some(notes) = non_blank(dealer.address_pronunciation_notes.as_deref()) {
            lines.push(String::new());
            lines.push("ADDRESS PRONUNCIATION (use these forms when saying the address aloud):".to_string());
            lines.push(notes.to_string());
        }
    }

    lines.join("\n")
}
