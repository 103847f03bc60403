//! Form filling against unknown portal markup
//!
//! Every logical field is located through its ordered locator list; the
//! first interactable match wins. Missing fields are skipped, not fatal.
//! The only reportable failure is the absence of any usable submit control.

use super::selectors::{FieldSelectorTable, FormField};
use crate::browser::{Locator, PortalPage};
use crate::clock::Clock;
use crate::models::PortalFormData;
use std::sync::Arc;
use std::time::Duration;

/// What happened to each field and to the submit control
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FillReport {
    pub filled: Vec<(FormField, Locator)>,
    pub not_found: Vec<FormField>,
    /// Located, but clearing or typing failed
    pub failed: Vec<FormField>,
    /// No value configured
    pub skipped: Vec<FormField>,
    pub submit: Option<Locator>,
}

impl FillReport {
    pub fn submitted(&self) -> bool {
        self.submit.is_some()
    }
}

pub struct FormFillEngine {
    fields: FieldSelectorTable,
    submit: &'static [Locator],
    keystroke_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl FormFillEngine {
    pub fn new(
        fields: FieldSelectorTable,
        submit: &'static [Locator],
        keystroke_delay: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fields,
            submit,
            keystroke_delay,
            clock,
        }
    }

    pub async fn fill_and_submit(&self, page: &dyn PortalPage, data: &PortalFormData) -> FillReport {
        let mut report = FillReport::default();

        for field in self.fields.fields() {
            let value = field.value_in(data);
            if value.is_empty() {
                tracing::debug!("No value configured for '{}', skipping", field);
                report.skipped.push(field);
                continue;
            }

            let Some(locator) = first_interactable(page, self.fields.locators(field)).await else {
                tracing::info!("   -> Field '{}' not found on page", field);
                report.not_found.push(field);
                continue;
            };

            match self.type_into(page, &locator, value).await {
                Ok(()) => {
                    tracing::info!("   -> Filled '{}' via {}", field, locator);
                    report.filled.push((field, locator));
                }
                Err(e) => {
                    tracing::warn!("   -> Found '{}' via {} but could not type: {}", field, locator, e);
                    report.failed.push(field);
                }
            }
        }

        report.submit = self.click_submit(page).await;
        match &report.submit {
            Some(locator) => tracing::info!("   -> Submitted via {}", locator),
            None => tracing::warn!("No usable submit control found on page"),
        }
        report
    }

    /// Clear whatever is there, then type one character at a time so that
    /// per-keystroke validators see ordinary input.
    async fn type_into(
        &self,
        page: &dyn PortalPage,
        locator: &Locator,
        value: &str,
    ) -> Result<(), crate::browser::BrowserError> {
        page.clear(locator).await?;
        let mut buf = [0u8; 4];
        for ch in value.chars() {
            page.type_text(locator, ch.encode_utf8(&mut buf)).await?;
            self.clock.sleep(self.keystroke_delay).await;
        }
        Ok(())
    }

    async fn click_submit(&self, page: &dyn PortalPage) -> Option<Locator> {
        for locator in self.submit {
            match page.is_interactable(locator).await {
                Ok(true) => match page.dom_click(locator).await {
                    Ok(()) => return Some(*locator),
                    Err(e) => tracing::debug!("Submit candidate {} not clickable: {}", locator, e),
                },
                Ok(false) => {}
                Err(e) => tracing::debug!("Submit selector {} failed: {}", locator, e),
            }
        }
        None
    }
}

/// First locator that resolves to an interactable element. Lookup errors
/// only disqualify the locator that raised them.
async fn first_interactable(page: &dyn PortalPage, locators: &[Locator]) -> Option<Locator> {
    for locator in locators {
        match page.is_interactable(locator).await {
            Ok(true) => return Some(*locator),
            Ok(false) => tracing::debug!("Selector {} matched nothing usable", locator),
            Err(e) => tracing::debug!("Selector {} failed: {}", locator, e),
        }
    }
    None
}
