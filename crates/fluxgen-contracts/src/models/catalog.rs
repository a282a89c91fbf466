use indexmap::IndexMap;

pub const DEFAULT_MODEL: &str = "black-forest-labs/flux-1.1-pro";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub label: String,
    /// Whether the model honours the `raw` flag.
    pub supports_raw: bool,
}

/// Known Flux models, in display order. Ids outside the catalog are still
/// passed through to the provider.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: IndexMap<String, ModelSpec>,
    default_model: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelCatalog {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        let models = models.unwrap_or_else(default_models);
        let default_model = if models.contains_key(DEFAULT_MODEL) {
            DEFAULT_MODEL.to_string()
        } else {
            models.keys().next().cloned().unwrap_or_default()
        };
        Self {
            models,
            default_model,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, label: &str, supports_raw: bool| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                label: label.to_string(),
                supports_raw,
            },
        );
    };

    insert("black-forest-labs/flux-dev", "FLUX.1 [dev]", false);
    insert("black-forest-labs/flux-pro", "FLUX.1 [pro]", false);
    insert("black-forest-labs/flux-1.1-pro", "FLUX1.1 [pro]", false);
    insert("black-forest-labs/flux-schnell", "FLUX.1 [schnell]", false);
    insert(
        "black-forest-labs/flux-1.1-pro-ultra",
        "FLUX1.1 [pro] ultra",
        true,
    );

    map
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{ModelCatalog, ModelSpec, DEFAULT_MODEL};

    #[test]
    fn default_catalog_lists_flux_models_in_order() {
        let catalog = ModelCatalog::default();
        let names: Vec<&str> = catalog.list().map(|model| model.name.as_str()).collect();
        assert_eq!(names.len(), 5);
        assert_eq!(names[0], "black-forest-labs/flux-dev");
        assert_eq!(catalog.default_model(), DEFAULT_MODEL);
        assert!(catalog.contains(" black-forest-labs/flux-schnell "));
        assert!(!catalog.contains("stability-ai/sdxl"));
    }

    #[test]
    fn only_ultra_supports_raw() {
        let catalog = ModelCatalog::default();
        let raw: Vec<&str> = catalog
            .list()
            .filter(|model| model.supports_raw)
            .map(|model| model.name.as_str())
            .collect();
        assert_eq!(raw, vec!["black-forest-labs/flux-1.1-pro-ultra"]);
    }

    #[test]
    fn custom_catalog_without_default_falls_back_to_first_entry() {
        let mut models = IndexMap::new();
        models.insert(
            "acme/painter".to_string(),
            ModelSpec {
                name: "acme/painter".to_string(),
                label: "Painter".to_string(),
                supports_raw: false,
            },
        );
        let catalog = ModelCatalog::new(Some(models));
        assert_eq!(catalog.default_model(), "acme/painter");
    }
}
