// This file is part of bracket-poll.
//
// bracket-poll is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// bracket-poll is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::BTreeMap,
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::info;
use serde::{Deserialize, Serialize};

/// A catalog entry as it was when a tournament was created.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Item {
    #[must_use]
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

/// Read-only source of the items a tournament is seeded from.
pub trait Catalog {
    /// # Errors
    ///
    /// If the dataset does not exist or cannot be read.
    fn get_items(&self, dataset: &str) -> anyhow::Result<Vec<Item>>;

    fn datasets(&self) -> Vec<String>;
}

/// Datasets kept in a RON map of `name -> [Item]`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RonCatalog {
    #[serde(skip)]
    path: Option<PathBuf>,
    pub datasets: BTreeMap<String, Vec<Item>>,
}

impl RonCatalog {
    /// A missing file yields an empty catalog.
    ///
    /// # Errors
    ///
    /// If the file exists but is not a valid catalog.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut catalog = match fs::read_to_string(path) {
            Ok(string) => {
                let datasets: BTreeMap<String, Vec<Item>> = ron::from_str(&string)
                    .map_err(|err| anyhow::Error::msg(format!("RON: {}: {err}", path.display())))?;

                Self {
                    datasets,
                    ..Self::default()
                }
            }
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Self::default(),
                _ => return Err(err.into()),
            },
        };

        info!(
            "loaded {} datasets from {}",
            catalog.datasets.len(),
            path.display()
        );
        catalog.path = Some(path.to_path_buf());

        Ok(catalog)
    }

    pub fn insert(&mut self, name: &str, items: Vec<Item>) {
        self.datasets.insert(name.to_string(), items);
    }
}

impl Catalog for RonCatalog {
    fn get_items(&self, dataset: &str) -> anyhow::Result<Vec<Item>> {
        self.datasets.get(dataset).cloned().ok_or_else(|| {
            let source = self
                .path
                .as_ref()
                .map_or_else(|| "memory".to_string(), |path| path.display().to_string());

            anyhow::Error::msg(format!("{source}: no dataset named {dataset}"))
        })
    }

    fn datasets(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }
}
