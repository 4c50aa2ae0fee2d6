//! Declarative filters a host presents to the user and a listing request
//! serializes into query parameters or path segments.
//!
//! Filters form a closed set (`FilterSpec`); every consumer matches on it
//! exhaustively, so adding a variant forces every serializer to handle it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriState {
    #[default]
    Ignore,
    Include,
    Exclude,
}

/// One selectable option. `value` is opaque to everything but the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOption {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub state: TriState,
}

impl FilterOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            state: TriState::Ignore,
        }
    }

    pub fn is_checked(&self) -> bool {
        self.state == TriState::Include
    }
}

/// Where a group's selections end up in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Placement {
    #[default]
    Query,
    /// `/{key}/{value}` appended to the path (just `/{value}` when the key is empty).
    Path,
}

/// A named, ordered set of options sharing one parameter key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub name: String,
    pub key: String,
    pub options: Vec<FilterOption>,
    #[serde(default)]
    pub placement: Placement,
}

impl FilterGroup {
    pub fn new(name: impl Into<String>, key: impl Into<String>, options: Vec<FilterOption>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            options,
            placement: Placement::Query,
        }
    }

    /// Builds a group from `(label, value)` pairs.
    pub fn from_pairs(name: &str, key: &str, pairs: &[(&str, &str)]) -> Self {
        Self::new(
            name,
            key,
            pairs.iter().map(|(l, v)| FilterOption::new(*l, *v)).collect(),
        )
    }

    pub fn in_path(mut self) -> Self {
        self.placement = Placement::Path;
        self
    }

    /// Sets the state of the option carrying `value`; returns false when absent.
    pub fn set_state(&mut self, value: &str, state: TriState) -> bool {
        match self.options.iter_mut().find(|o| o.value == value) {
            Some(option) => {
                option.state = state;
                true
            }
            None => false,
        }
    }
}

/// How excluded tri-state options are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exclusion {
    /// Same key, value prefixed (e.g. `genre[]=-romance`).
    Prefix(String),
    /// A separate key (e.g. `exclude=romance`).
    Key(String),
}

impl Default for Exclusion {
    fn default() -> Self {
        Self::Prefix("-".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A filter as shown by the host. UI-only variants serialize to nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterSpec {
    Header(String),
    Separator,
    Text {
        name: String,
        key: String,
        value: String,
    },
    Select {
        group: FilterGroup,
        selected: usize,
    },
    Sort {
        group: FilterGroup,
        selected: usize,
        /// Key and value of the direction parameter, when the site takes one.
        direction: Option<(String, SortDirection)>,
    },
    CheckGroup(FilterGroup),
    TriStateGroup {
        group: FilterGroup,
        exclusion: Exclusion,
    },
}

/// One serialized key/value pair and where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParam {
    pub key: String,
    pub value: String,
    pub placement: Placement,
}

impl FilterParam {
    fn new(key: &str, value: &str, placement: Placement) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            placement,
        }
    }
}

impl FilterSpec {
    pub fn select(name: &str, key: &str, pairs: &[(&str, &str)], selected: usize) -> Self {
        Self::Select {
            group: FilterGroup::from_pairs(name, key, pairs),
            selected,
        }
    }

    /// A single-option sort used to specialize search into popular/latest.
    pub fn sort_preset(key: &str, value: &str) -> Self {
        Self::Sort {
            group: FilterGroup::new("", key, vec![FilterOption::new("", value)]),
            selected: 0,
            direction: None,
        }
    }

    pub fn text(name: &str, key: &str, value: &str) -> Self {
        Self::Text {
            name: name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Header(text) => text,
            Self::Separator => "",
            Self::Text { name, .. } => name,
            Self::Select { group, .. }
            | Self::Sort { group, .. }
            | Self::CheckGroup(group)
            | Self::TriStateGroup { group, .. } => &group.name,
        }
    }

    /// Parameter key this filter is declared under, if it serializes at all.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Header(_) | Self::Separator => None,
            Self::Text { key, .. } => Some(key),
            Self::Select { group, .. }
            | Self::Sort { group, .. }
            | Self::CheckGroup(group)
            | Self::TriStateGroup { group, .. } => Some(&group.key),
        }
    }

    /// Selects option `index` of a `Select`/`Sort`; returns false otherwise.
    pub fn set_selected(&mut self, index: usize) -> bool {
        match self {
            Self::Select { group, selected } | Self::Sort { group, selected, .. }
                if index < group.options.len() =>
            {
                *selected = index;
                true
            }
            _ => false,
        }
    }

    /// Current selection of a `Select`/`Sort` filter.
    pub fn selected_option(&self) -> Option<&FilterOption> {
        match self {
            Self::Select { group, selected } | Self::Sort { group, selected, .. } => {
                group.options.get(*selected)
            }
            _ => None,
        }
    }

    /// Serializes the current selection. Blank values produce nothing.
    pub fn params(&self) -> Vec<FilterParam> {
        match self {
            Self::Header(_) | Self::Separator => Vec::new(),
            Self::Text { key, value, .. } => {
                let value = value.trim();
                if value.is_empty() {
                    Vec::new()
                } else {
                    vec![FilterParam::new(key, value, Placement::Query)]
                }
            }
            Self::Select { group, .. } => self
                .selected_option()
                .filter(|o| !o.value.trim().is_empty())
                .map(|o| vec![FilterParam::new(&group.key, &o.value, group.placement)])
                .unwrap_or_default(),
            Self::Sort {
                group, direction, ..
            } => {
                let Some(option) = self.selected_option().filter(|o| !o.value.trim().is_empty())
                else {
                    return Vec::new();
                };
                let mut out = vec![FilterParam::new(&group.key, &option.value, group.placement)];
                if let Some((dir_key, dir)) = direction {
                    let value = match dir {
                        SortDirection::Ascending => "asc",
                        SortDirection::Descending => "desc",
                    };
                    out.push(FilterParam::new(dir_key, value, Placement::Query));
                }
                out
            }
            Self::CheckGroup(group) => group
                .options
                .iter()
                .filter(|o| o.is_checked())
                .map(|o| FilterParam::new(&group.key, &o.value, group.placement))
                .collect(),
            Self::TriStateGroup { group, exclusion } => group
                .options
                .iter()
                .filter_map(|o| match (o.state, exclusion) {
                    (TriState::Ignore, _) => None,
                    (TriState::Include, _) => {
                        Some(FilterParam::new(&group.key, &o.value, group.placement))
                    }
                    (TriState::Exclude, Exclusion::Prefix(prefix)) => Some(FilterParam::new(
                        &group.key,
                        &format!("{}{}", prefix, o.value),
                        group.placement,
                    )),
                    (TriState::Exclude, Exclusion::Key(key)) => {
                        Some(FilterParam::new(key, &o.value, group.placement))
                    }
                })
                .collect(),
        }
    }
}
