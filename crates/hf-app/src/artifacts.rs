//! Conversion of gateway step payloads into artifact sets.

use std::collections::HashMap;
use std::sync::Arc;

use hf_core::ResultId;
use hf_gateway::{CategoryImage, StepImages};
use hf_results::{Artifact, ArtifactPayload, CategoryCatalog, StepArtifactSet};

/// Category catalogs by result id.
pub type Catalogs = HashMap<ResultId, Arc<CategoryCatalog>>;

fn artifact(image: CategoryImage, catalog: Option<&CategoryCatalog>) -> Option<Artifact> {
    let payload = match (image.encoded_image, image.value) {
        (Some(encoded), _) => ArtifactPayload::Image { encoded },
        (None, Some(value)) => ArtifactPayload::Metric { value },
        (None, None) => return None,
    };
    Some(Artifact {
        category_id: image.category_id,
        category_name: catalog
            .and_then(|c| c.name(image.category_id))
            .map(str::to_string),
        payload,
    })
}

/// Split one step into one complete set per result id.
///
/// Categories without a result id belong to `fallback`. Sets come out in the
/// order their result ids first appear; artifacts keep the order sent.
pub fn sets_from_step(step: StepImages, fallback: &ResultId, catalogs: &Catalogs) -> Vec<StepArtifactSet> {
    let mut sets: Vec<StepArtifactSet> = Vec::new();
    for image in step.categories {
        let result_id = image
            .experiment_result_id
            .clone()
            .unwrap_or_else(|| fallback.clone());
        let catalog = catalogs.get(&result_id).map(Arc::as_ref);
        let Some(artifact) = artifact(image, catalog) else {
            continue;
        };
        match sets.iter_mut().find(|s| s.result_id == result_id) {
            Some(set) => set.artifacts.push(artifact),
            None => sets.push(StepArtifactSet {
                result_id,
                step: step.step,
                artifacts: vec![artifact],
            }),
        }
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(result: Option<&str>, category_id: i64) -> CategoryImage {
        CategoryImage {
            experiment_result_id: result.map(ResultId::from),
            category_id,
            encoded_image: Some("AA==".into()),
            value: None,
        }
    }

    #[test]
    fn groups_by_result_and_names_categories() {
        let mut catalogs = Catalogs::new();
        catalogs.insert(
            ResultId::from("a"),
            Arc::new(CategoryCatalog::from_pairs([(1, "Simulator")])),
        );
        let step = StepImages {
            step: 45,
            categories: vec![
                image(Some("b"), 1),
                image(None, 1),
                image(Some("b"), 2),
                CategoryImage {
                    experiment_result_id: None,
                    category_id: 3,
                    encoded_image: None,
                    value: None,
                },
            ],
        };

        let sets = sets_from_step(step, &ResultId::from("a"), &catalogs);

        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].result_id, ResultId::from("b"));
        assert_eq!(sets[0].artifacts.len(), 2);
        assert_eq!(sets[0].artifacts[0].category_name, None);
        assert_eq!(sets[1].result_id, ResultId::from("a"));
        assert_eq!(sets[1].artifacts[0].category_name.as_deref(), Some("Simulator"));
        assert!(sets.iter().all(|s| s.step == 45));
    }
}
