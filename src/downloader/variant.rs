use std::collections::BTreeMap;
use crate::api::{SelectionPreference, StreamVariant, DEFAULT_AUDIO_TRACK};
use crate::errors::{AppError, Result};

/// Variants grouped as audio track -> resolution -> variant.
///
/// Audio groups keep the order in which they were first seen; resolutions
/// within a group are ordered ascending.
#[derive(Debug, Default)]
pub struct VariantTree {
    groups: Vec<(String, BTreeMap<u32, StreamVariant>)>,
}

impl VariantTree {
    pub fn build(variants: &[StreamVariant]) -> Self {
        let mut tree = VariantTree::default();
        for variant in variants {
            let index = match tree.groups.iter().position(|(audio, _)| *audio == variant.audio_track) {
                Some(index) => index,
                None => {
                    tree.groups.push((variant.audio_track.clone(), BTreeMap::new()));
                    tree.groups.len() - 1
                }
            };
            tree.groups[index].1.insert(variant.resolution, variant.clone());
        }
        tree
    }

    pub fn group(&self, audio_track: &str) -> Option<&BTreeMap<u32, StreamVariant>> {
        self.groups
            .iter()
            .find(|(audio, _)| audio == audio_track)
            .map(|(_, group)| group)
    }

    /// Requested track, then the default track, then the first track seen.
    fn preferred_group(&self, audio_track: &str) -> Option<&BTreeMap<u32, StreamVariant>> {
        self.group(audio_track)
            .or_else(|| self.group(DEFAULT_AUDIO_TRACK))
            .or_else(|| self.groups.first().map(|(_, group)| group))
    }
}

/// Picks the variant that best matches the preference.
pub fn select_best(variants: &[StreamVariant], preference: &SelectionPreference) -> Result<StreamVariant> {
    let tree = VariantTree::build(variants);
    let group = tree.preferred_group(&preference.audio_track).ok_or(AppError::NoVariants)?;

    let chosen = match preference.target_resolution {
        Some(target) => {
            let mut best: Option<(&StreamVariant, u32)> = None;
            for (resolution, variant) in group {
                let distance = resolution.abs_diff(target);
                // strict comparison keeps the lower resolution on ties
                if best.map_or(true, |(_, best_distance)| distance < best_distance) {
                    best = Some((variant, distance));
                }
            }
            best.map(|(variant, _)| variant)
        }
        None => group.values().next_back(),
    };

    chosen.cloned().ok_or(AppError::NoVariants)
}
