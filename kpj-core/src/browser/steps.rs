//! Parameterized browser actions and the typed replies their scripts produce.
//!
//! Callers never build script text. Each [`StepAction`] is serialized to JSON
//! once and injected as a single `params` literal at the top of a fixed
//! script template, so identifiers, keywords and selectors are always
//! escaped by `serde_json`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bridge::ScriptOutcome;
use super::error::{BrowserError, BrowserResult};

const MARKER_ATTRIBUTE: &str = "data-kpj-marker";

/// CSS selector for an element tagged by a previous find step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementSelector(String);

impl ElementSelector {
    pub fn marker(token: &str) -> Self {
        let token: String = token
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        Self(format!("[{MARKER_ATTRIBUTE}=\"{token}\"]"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    FindField {
        keywords: Vec<String>,
        marker: String,
    },
    FillValue {
        selector: ElementSelector,
        value: String,
    },
    FindButton {
        keywords: Vec<String>,
        marker: String,
    },
    Click {
        selector: ElementSelector,
    },
    Extract {
        max_rows: usize,
        max_containers: usize,
        text_limit: usize,
    },
}

impl StepAction {
    pub fn label(&self) -> &'static str {
        match self {
            StepAction::FindField { .. } => "find_field",
            StepAction::FillValue { .. } => "fill_field",
            StepAction::FindButton { .. } => "find_button",
            StepAction::Click { .. } => "click_button",
            StepAction::Extract { .. } => "extract_data",
        }
    }

    /// Script text for the bridge: a function expression with no arguments.
    pub fn compile(&self) -> BrowserResult<String> {
        let params = serde_json::to_string(self)?;
        let template = match self {
            StepAction::FindField { .. } => FIND_FIELD_SCRIPT,
            StepAction::FillValue { .. } => FILL_VALUE_SCRIPT,
            StepAction::FindButton { .. } => FIND_BUTTON_SCRIPT,
            StepAction::Click { .. } => CLICK_SCRIPT,
            StepAction::Extract { .. } => EXTRACT_SCRIPT,
        };
        Ok(template
            .replace("__MARKER_ATTRIBUTE__", MARKER_ATTRIBUTE)
            .replacen("__PARAMS__", &params, 1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

impl StepResult {
    /// A script that threw has no payload; a script that returned
    /// `{success: false}` keeps its reply as payload.
    pub fn from_outcome(outcome: ScriptOutcome) -> Self {
        match outcome {
            Ok(value) => {
                let success = value
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let error = value
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Self {
                    success,
                    payload: Some(value),
                    error,
                }
            }
            Err(message) => Self {
                success: false,
                payload: None,
                error: Some(message),
            },
        }
    }

    pub fn threw(&self) -> bool {
        !self.success && self.payload.is_none()
    }

    pub fn decode<T: DeserializeOwned>(self) -> BrowserResult<T> {
        let payload = self
            .payload
            .ok_or_else(|| BrowserError::Decode("step returned no payload".into()))?;
        Ok(serde_json::from_value(payload)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    Keyword,
    EmptyField,
    FirstButton,
}

impl MatchReason {
    pub fn is_fallback(self) -> bool {
        !matches!(self, MatchReason::Keyword)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMatch {
    pub id: Option<String>,
    pub name: Option<String>,
    pub placeholder: Option<String>,
    pub reason: MatchReason,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindFieldReply {
    pub field: FieldMatch,
    pub total_fields: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonMatch {
    pub id: Option<String>,
    pub text: Option<String>,
    pub class_name: Option<String>,
    pub reason: MatchReason,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindButtonReply {
    pub button: ButtonMatch,
    pub total_buttons: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableCell {
    pub text: String,
    pub class_name: String,
    pub col_span: u32,
    pub row_span: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableRow {
    pub row_index: usize,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableData {
    pub table_index: usize,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerData {
    pub element: String,
    pub class_name: String,
    pub text: String,
    pub children: usize,
}

/// Everything harvested from the result page. May be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractionBundle {
    pub page_title: String,
    pub url: String,
    pub timestamp: Option<String>,
    pub tables: Vec<TableData>,
    pub containers: Vec<ContainerData>,
}

impl ExtractionBundle {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.containers.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|table| table.rows.len()).sum()
    }
}

const FIND_FIELD_SCRIPT: &str = r#"function() {
    var params = __PARAMS__;
    var stale = document.querySelectorAll('[__MARKER_ATTRIBUTE__]');
    for (var s = 0; s < stale.length; s++) {
        stale[s].removeAttribute('__MARKER_ATTRIBUTE__');
    }
    var inputs = document.querySelectorAll('input[type="text"], input[type="search"], input[type="number"], input[type="tel"], input:not([type])');
    var matches = function(input) {
        var label = input.parentElement ? (input.parentElement.textContent || '') : '';
        var haystack = [input.placeholder || '', input.name || '', input.id || '', label].join(' ').toLowerCase();
        return params.keywords.some(function(keyword) {
            return haystack.indexOf(String(keyword).toLowerCase()) !== -1;
        });
    };
    var chosen = null;
    var reason = 'keyword';
    for (var i = 0; i < inputs.length && !chosen; i++) {
        if (matches(inputs[i])) {
            chosen = inputs[i];
        }
    }
    for (var j = 0; j < inputs.length && !chosen; j++) {
        if (!(inputs[j].value || '').trim()) {
            chosen = inputs[j];
            reason = 'empty_field';
        }
    }
    if (!chosen) {
        return { success: false, error: 'KPJ field not found', totalFields: inputs.length };
    }
    chosen.setAttribute('__MARKER_ATTRIBUTE__', params.marker);
    return {
        success: true,
        field: {
            id: chosen.id || null,
            name: chosen.name || null,
            placeholder: chosen.placeholder || null,
            reason: reason
        },
        totalFields: inputs.length
    };
}"#;

const FILL_VALUE_SCRIPT: &str = r#"function() {
    var params = __PARAMS__;
    var field = document.querySelector(params.selector);
    if (!field) {
        return { success: false, error: 'Field element not found' };
    }
    if (typeof field.focus === 'function') {
        field.focus();
    }
    field.value = params.value;
    ['input', 'change', 'blur'].forEach(function(name) {
        field.dispatchEvent(new Event(name, { bubbles: true }));
    });
    return { success: true, value: field.value, fieldId: field.id || null, fieldName: field.name || null };
}"#;

const FIND_BUTTON_SCRIPT: &str = r#"function() {
    var params = __PARAMS__;
    var buttons = document.querySelectorAll('button, input[type="submit"], input[type="button"]');
    var describe = function(btn, reason) {
        return {
            id: btn.id || null,
            text: (btn.textContent || btn.value || '').trim() || null,
            className: (typeof btn.className === 'string' && btn.className) ? btn.className : null,
            reason: reason
        };
    };
    var chosen = null;
    var reason = 'keyword';
    for (var i = 0; i < buttons.length && !chosen; i++) {
        var btn = buttons[i];
        var haystack = [
            btn.textContent || btn.value || btn.innerText || '',
            typeof btn.className === 'string' ? btn.className : '',
            btn.id || ''
        ].join(' ').toLowerCase();
        var hit = params.keywords.some(function(keyword) {
            return haystack.indexOf(String(keyword).toLowerCase()) !== -1;
        });
        if (hit) {
            chosen = btn;
        }
    }
    if (!chosen && buttons.length > 0) {
        chosen = buttons[0];
        reason = 'first_button';
    }
    if (!chosen) {
        return { success: false, error: 'Search button not found', totalButtons: 0 };
    }
    chosen.setAttribute('__MARKER_ATTRIBUTE__', params.marker);
    return { success: true, button: describe(chosen, reason), totalButtons: buttons.length };
}"#;

const CLICK_SCRIPT: &str = r#"function() {
    var params = __PARAMS__;
    var button = document.querySelector(params.selector);
    if (!button) {
        return { success: false, error: 'Button element not found' };
    }
    button.click();
    return { success: true, clicked: true, buttonText: (button.textContent || button.value || '').trim() };
}"#;

const EXTRACT_SCRIPT: &str = r#"function() {
    var params = __PARAMS__;
    var tables = document.querySelectorAll('table');
    var allTables = [];
    for (var t = 0; t < tables.length; t++) {
        var rows = tables[t].querySelectorAll('tr');
        var tableRows = [];
        for (var r = 0; r < Math.min(rows.length, params.max_rows); r++) {
            var cells = rows[r].querySelectorAll('td, th');
            var rowCells = [];
            for (var c = 0; c < cells.length; c++) {
                rowCells.push({
                    text: (cells[c].textContent || '').trim(),
                    className: typeof cells[c].className === 'string' ? cells[c].className : '',
                    colSpan: cells[c].colSpan || 1,
                    rowSpan: cells[c].rowSpan || 1
                });
            }
            if (rowCells.length > 0) {
                tableRows.push({ rowIndex: r, cells: rowCells });
            }
        }
        if (tableRows.length > 0) {
            allTables.push({ tableIndex: t, rows: tableRows });
        }
    }
    var found = document.querySelectorAll('.data-table, .result-container, .search-result, [class*="result"], [class*="data"]');
    var containers = [];
    for (var i = 0; i < Math.min(found.length, params.max_containers); i++) {
        containers.push({
            element: found[i].tagName,
            className: typeof found[i].className === 'string' ? found[i].className : '',
            text: (found[i].textContent || '').trim().substring(0, params.text_limit),
            children: found[i].children.length
        });
    }
    var heading = document.querySelector('h1, h2, .page-title, .title');
    return {
        success: true,
        pageTitle: heading ? (heading.textContent || '').trim() : (document.title || ''),
        url: window.location.href,
        timestamp: new Date().toISOString(),
        tables: allTables,
        containers: containers
    };
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_are_injected_as_escaped_json() {
        let action = StepAction::FillValue {
            selector: ElementSelector::marker("abc123"),
            value: "12'); alert(\"x\"); //".into(),
        };
        let script = action.compile().unwrap();
        assert!(script.starts_with("function() {"));
        assert!(!script.contains("__PARAMS__"));
        assert!(script.contains(r#""value":"12'); alert(\"x\"); //""#));
        assert!(script.contains(r#""selector":"[data-kpj-marker=\"abc123\"]""#));
    }

    #[test]
    fn marker_selector_drops_unsafe_characters() {
        let selector = ElementSelector::marker("a\"]b c");
        assert_eq!(selector.as_str(), "[data-kpj-marker=\"abc\"]");
    }

    #[test]
    fn find_scripts_share_marker_attribute() {
        let script = StepAction::FindButton {
            keywords: vec!["cari".into()],
            marker: "m1".into(),
        }
        .compile()
        .unwrap();
        assert!(script.contains("setAttribute('data-kpj-marker', params.marker)"));
        assert!(script.contains(r#""keywords":["cari"]"#));
    }

    #[test]
    fn step_result_distinguishes_thrown_from_reported_failure() {
        let thrown = StepResult::from_outcome(Err("ReferenceError".into()));
        assert!(thrown.threw());

        let reported = StepResult::from_outcome(Ok(json!({
            "success": false,
            "error": "KPJ field not found",
            "totalFields": 0
        })));
        assert!(!reported.success);
        assert!(!reported.threw());
        assert_eq!(reported.error.as_deref(), Some("KPJ field not found"));
    }

    #[test]
    fn field_reply_decodes_fallback_reason() {
        let result = StepResult::from_outcome(Ok(json!({
            "success": true,
            "field": { "id": null, "name": "q", "placeholder": null, "reason": "empty_field" },
            "totalFields": 3
        })));
        let reply: FindFieldReply = result.decode().unwrap();
        assert_eq!(reply.field.reason, MatchReason::EmptyField);
        assert!(reply.field.reason.is_fallback());
        assert_eq!(reply.total_fields, 3);
    }

    #[test]
    fn empty_extraction_is_valid() {
        let result = StepResult::from_outcome(Ok(json!({
            "success": true,
            "pageTitle": "",
            "url": "https://sipp.example/",
            "tables": [],
            "containers": []
        })));
        let bundle: ExtractionBundle = result.decode().unwrap();
        assert!(bundle.is_empty());
        assert_eq!(bundle.row_count(), 0);
    }
}
