//! Static selector tables for unknown portal markup
//!
//! Each logical field maps to locators ordered most-specific-first. The
//! tables are data; `FormFillEngine` is the only code that walks them.

use crate::browser::Locator;
use crate::browser::Locator::{Css, Label};
use crate::models::PortalFormData;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormField {
    IdentityNumber,
    FirstName,
    LastName,
    BirthYear,
}

impl FormField {
    pub fn value_in(self, data: &PortalFormData) -> &str {
        match self {
            FormField::IdentityNumber => &data.id_number,
            FormField::FirstName => &data.first_name,
            FormField::LastName => &data.last_name,
            FormField::BirthYear => &data.birth_year,
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormField::IdentityNumber => "idnumber",
            FormField::FirstName => "name",
            FormField::LastName => "surname",
            FormField::BirthYear => "birthyear",
        };
        f.write_str(name)
    }
}

/// Logical field -> ordered locators
#[derive(Debug, Clone, Copy)]
pub struct FieldSelectorTable {
    entries: &'static [(FormField, &'static [Locator])],
}

impl FieldSelectorTable {
    pub const fn new(entries: &'static [(FormField, &'static [Locator])]) -> Self {
        Self { entries }
    }

    pub fn locators(&self, field: FormField) -> &'static [Locator] {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, locators)| *locators)
            .unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = FormField> + '_ {
        self.entries.iter().map(|(f, _)| *f)
    }
}

pub static DEFAULT_FIELDS: FieldSelectorTable = FieldSelectorTable::new(&[
    (
        FormField::IdentityNumber,
        &[
            Css("#idnumber"),
            Css("input[name='idnumber']"),
            Css("input[id*='idnumber' i]"),
            Css("input[name*='tckn' i]"),
            Css("input[name*='kimlik' i]"),
            Css("input[name*='identity' i]"),
            Css("input[placeholder*='kimlik' i]"),
            Css("input[placeholder*='identity' i]"),
        ],
    ),
    (
        FormField::FirstName,
        &[
            Css("#name"),
            Css("input[name='name']"),
            Css("input[name='firstname' i]"),
            Css("input[id*='firstname' i]"),
            Css("input[name='ad' i]"),
            Css("input[placeholder*='first name' i]"),
            Css("input[placeholder='Ad' i]"),
        ],
    ),
    (
        FormField::LastName,
        &[
            Css("#surname"),
            Css("input[name='surname']"),
            Css("input[name='lastname' i]"),
            Css("input[id*='lastname' i]"),
            Css("input[name='soyad' i]"),
            Css("input[placeholder*='last name' i]"),
            Css("input[placeholder*='soyad' i]"),
        ],
    ),
    (
        FormField::BirthYear,
        &[
            Css("#birthyear"),
            Css("input[name='birthyear']"),
            Css("select[name='birthyear']"),
            Css("input[name*='birth' i]"),
            Css("input[id*='birth' i]"),
            Css("input[name*='dogum' i]"),
            Css("input[placeholder*='birth' i]"),
            Css("input[placeholder*='doğum' i]"),
        ],
    ),
]);

/// Submit controls, tried in order; only visible matches are clicked
pub static SUBMIT_LOCATORS: &[Locator] = &[
    Css("button[type='submit']"),
    Css("input[type='submit']"),
    Css("#submit"),
    Css("button[id*='submit' i]"),
    Css("[name*='submit' i]"),
    Css("button[id*='connect' i]"),
    Css("[name*='connect' i]"),
    Css("button[id*='login' i]"),
    Css("[name*='login' i]"),
    Label("Connect"),
    Label("Login"),
    Label("Bağlan"),
    Label("Giriş"),
];
