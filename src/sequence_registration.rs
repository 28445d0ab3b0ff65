//! Sequence registration: align every frame of a volume sequence onto one
//! fixed frame, one pairwise registration at a time.

use crate::engine::ElastixEngine;
use crate::error::{Error, Result};
use crate::sequence::{BrowserRegistry, Sequence};
use crate::transform::Transform;
use crate::volume::Volume;

/// Options of a sequence registration run.
#[derive(Debug, Clone)]
pub struct SequenceOptions {
    /// Store transforms in the moving-to-fixed direction as computed
    /// (true), or flipped to fixed-to-moving (false).
    pub moving_to_fixed: bool,
    /// First item of the processed range.
    pub start_item: usize,
    /// Last item of the processed range, inclusive. Defaults to the final
    /// item of the input sequence.
    pub end_item: Option<usize>,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            moving_to_fixed: true,
            start_item: 0,
            end_item: None,
        }
    }
}

/// Drives the pairwise registration engine across a time sequence.
pub struct SequenceRegistration {
    engine: ElastixEngine,
}

impl SequenceRegistration {
    pub fn new(engine: ElastixEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ElastixEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ElastixEngine {
        &mut self.engine
    }

    /// Register every frame in the selected range onto the fixed frame,
    /// filling the optional output sequences item by item.
    ///
    /// Output sequences are cleared up front and inherit the input's index
    /// metadata; each result is stored under the index value of the frame
    /// it came from. The fixed frame's own entries (a copy of the frame and
    /// an identity transform) are written before the loop starts, so they
    /// survive a mid-run cancellation.
    #[allow(clippy::too_many_arguments)]
    pub fn register_sequence(
        &mut self,
        input: &Sequence<Volume>,
        mut output_volumes: Option<&mut Sequence<Volume>>,
        mut output_transforms: Option<&mut Sequence<Transform>>,
        fixed_item: usize,
        preset_index: usize,
        options: &SequenceOptions,
        browsers: Option<&mut BrowserRegistry>,
    ) -> Result<()> {
        let count = input.len();
        if fixed_item >= count {
            return Err(Error::ItemOutOfRange {
                item: fixed_item,
                count,
            });
        }
        let start = options.start_item;
        let end = options.end_item.unwrap_or(count.saturating_sub(1));
        if start > end || end >= count {
            return Err(Error::InvalidRange { start, end });
        }

        let parameter_files = self
            .engine
            .registration_presets()?
            .resolved_parameter_files(preset_index)?;

        // A stale cancel request from a previous run must not abort this one.
        self.engine.set_abort_requested(false);

        let fixed_volume = input.materialize(fixed_item)?;
        if let Some(out) = output_volumes.as_deref_mut() {
            out.clear_retaining_metadata_from(input);
        }
        if let Some(out) = output_transforms.as_deref_mut() {
            out.clear_retaining_metadata_from(input);
        }

        // The fixed frame maps onto itself; record that before any engine
        // call so a cancelled run still leaves a consistent fixed entry.
        let fixed_in_range = (start..=end).contains(&fixed_item);
        if fixed_in_range {
            let fixed_value = input
                .nth_index_value(fixed_item)
                .ok_or(Error::ItemOutOfRange {
                    item: fixed_item,
                    count,
                })?
                .to_string();
            if let Some(out) = output_volumes.as_deref_mut() {
                let mut copy = fixed_volume.clone();
                copy.set_name(format!("Volume {fixed_value}"));
                out.set_at_value(&fixed_value, copy);
            }
            if let Some(out) = output_transforms.as_deref_mut() {
                out.set_at_value(&fixed_value, Transform::identity());
            }
        }

        let mut scratch_volume = Volume::empty("OutputVolume");
        let mut scratch_transform = output_transforms.is_some().then(Transform::identity);
        let total = end - start + 1;

        let result = (|| -> Result<()> {
            for item in start..=end {
                if item > start {
                    self.engine.add_log("---------------------");
                }
                self.engine
                    .add_log(&format!("Registering item {}/{}", item - start + 1, total));
                if item == fixed_item {
                    self.engine.add_log("Same as fixed volume.");
                    continue;
                }

                let moving_volume = input.materialize(item)?;
                let vol_out = if output_volumes.is_some() {
                    Some(&mut scratch_volume)
                } else {
                    None
                };
                self.engine.register_volumes(
                    &fixed_volume,
                    &moving_volume,
                    &parameter_files,
                    vol_out,
                    scratch_transform.as_mut(),
                    None,
                    None,
                )?;

                let index_value = input
                    .nth_index_value(item)
                    .ok_or(Error::ItemOutOfRange { item, count })?
                    .to_string();
                if let Some(out) = output_volumes.as_deref_mut() {
                    out.set_at_value(&index_value, scratch_volume.clone());
                }
                if let Some(transform) = &scratch_transform {
                    let stored = if options.moving_to_fixed {
                        transform.clone()
                    } else {
                        transform.inverted()?
                    };
                    if let Some(out) = output_transforms.as_deref_mut() {
                        out.set_at_value(&index_value, stored);
                    }
                }
            }

            // The fixed frame's copy never went through the resampler, so
            // its scalar type and geometry can differ from every registered
            // frame. Unify them against the first registered result.
            if fixed_in_range {
                if let Some(out) = output_volumes.as_deref_mut() {
                    let donor_item = (start..=end).find(|&i| i != fixed_item);
                    let fixed_value = input
                        .nth_index_value(fixed_item)
                        .map(str::to_string)
                        .unwrap_or_default();
                    if let Some(donor_item) = donor_item {
                        let donor_value = input
                            .nth_index_value(donor_item)
                            .map(str::to_string)
                            .unwrap_or_default();
                        let donor = out.get(&donor_value).cloned();
                        if let (Some(donor), Some(fixed_out)) =
                            (donor, out.get_mut(&fixed_value))
                        {
                            fixed_out.cast_to_short();
                            fixed_out.copy_geometry_from(&donor);
                        }
                    }
                }
            }
            Ok(())
        })();

        // Whatever happened, wire the partial (or complete) outputs into
        // the browser replaying the input, so they advance with it.
        if let Some(registry) = browsers {
            if let Some(browser) = registry.find_browser_for(input.name()) {
                let outputs: [Option<&str>; 2] = [
                    output_volumes
                        .as_deref()
                        .filter(|s| !s.is_empty())
                        .map(|s| s.name()),
                    output_transforms
                        .as_deref()
                        .filter(|s| !s.is_empty())
                        .map(|s| s.name()),
                ];
                for name in outputs.into_iter().flatten() {
                    if !browser.is_synchronized(name) {
                        browser.synchronize(name);
                        browser.set_overwrite_proxy_name(name, true);
                    }
                }
            }
        }

        result
    }
}
