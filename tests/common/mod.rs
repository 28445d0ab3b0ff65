//! Shared fixtures: a fake elastix/transformix pair implemented as shell
//! scripts, plus volume and field builders.
//!
//! The fake tools record their argument lists, honor a per-fixture config
//! file, and produce the output files the driver expects, so the full
//! subprocess pipeline runs without a real elastix installation.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Point3, Vector3};
use tempfile::TempDir;

use seqreg::{metaimage, DisplacementField, ElastixEngine, Volume, VoxelData};

const ELASTIX_SCRIPT: &str = r#"#!/bin/sh
. "$(dirname "$0")/fake.conf"
echo "$@" >> "$FAKE_ELASTIX_ARGS"
count=0
[ -f "$FAKE_RUN_COUNT" ] && count=$(cat "$FAKE_RUN_COUNT")
count=$((count + 1))
echo "$count" > "$FAKE_RUN_COUNT"
if [ -n "$FAKE_ELASTIX_FAIL" ]; then
    echo "fake elastix failure diagnostics"
    exit 1
fi
if [ -n "$FAKE_SLOW_ON_RUN" ] && [ "$count" -eq "$FAKE_SLOW_ON_RUN" ]; then
    i=0
    while [ $i -lt 100 ]; do
        echo "iterating $i"
        sleep 0.1
        i=$((i + 1))
    done
fi
out=""
params=0
prev=""
for a in "$@"; do
    [ "$prev" = "-out" ] && out="$a"
    [ "$a" = "-p" ] && params=$((params + 1))
    prev="$a"
done
i=0
while [ $i -lt $params ]; do
    echo "(Transform \"fake\")" > "$out/TransformParameters.$i.txt"
    i=$((i + 1))
done
echo "fake elastix done"
exit 0
"#;

const TRANSFORMIX_SCRIPT: &str = r#"#!/bin/sh
. "$(dirname "$0")/fake.conf"
echo "$@" >> "$FAKE_TRANSFORMIX_ARGS"
out=""
in=""
want_def=0
prev=""
for a in "$@"; do
    case "$prev" in
        -out) out="$a" ;;
        -in) in="$a" ;;
    esac
    [ "$a" = "-def" ] && want_def=1
    prev="$a"
done
if [ -n "$FAKE_RESULT_VOLUME" ]; then
    cp "$FAKE_RESULT_VOLUME" "$out/result.mhd"
else
    cp "$in" "$out/result.mhd"
fi
if [ $want_def -eq 1 ]; then
    cp "$FAKE_DEFORMATION_FIELD" "$out/deformationField.mhd"
fi
echo "fake transformix done"
exit 0
"#;

/// A directory holding fake `elastix`/`transformix` executables and their
/// per-fixture configuration.
pub struct FakeBin {
    dir: TempDir,
}

impl FakeBin {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        write_script(&bin.join("elastix"), ELASTIX_SCRIPT);
        write_script(&bin.join("transformix"), TRANSFORMIX_SCRIPT);
        let conf = format!(
            "FAKE_ELASTIX_ARGS=\"{}\"\nFAKE_TRANSFORMIX_ARGS=\"{}\"\nFAKE_RUN_COUNT=\"{}\"\n",
            dir.path().join("elastix-args.txt").display(),
            dir.path().join("transformix-args.txt").display(),
            dir.path().join("run-count.txt").display(),
        );
        fs::write(bin.join("fake.conf"), conf).unwrap();
        Self { dir }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Append a `KEY="value"` line to the fake tools' config.
    pub fn set(&self, key: &str, value: &str) {
        let conf = self.bin_dir().join("fake.conf");
        let mut text = fs::read_to_string(&conf).unwrap();
        text.push_str(&format!("{key}=\"{value}\"\n"));
        fs::write(conf, text).unwrap();
    }

    /// One recorded argument line per elastix invocation.
    pub fn elastix_invocations(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("elastix-args.txt"))
    }

    pub fn transformix_invocations(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("transformix-args.txt"))
    }

    pub fn elastix_run_count(&self) -> usize {
        fs::read_to_string(self.dir.path().join("run-count.txt"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}

fn write_script(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Engine wired to the fake binaries, with presets and temp files under the
/// given directories.
pub fn engine_with(bin: &FakeBin, presets_dir: &Path, temp_root: &Path) -> ElastixEngine {
    let mut engine = ElastixEngine::new("/nonexistent", presets_dir);
    engine.set_bin_dir(bin.bin_dir());
    engine.set_temp_root(temp_root);
    engine
}

/// A preset database with one preset of `file_count` parameter files.
pub fn write_presets(dir: &Path, file_count: usize) {
    let mut names = Vec::new();
    for i in 0..file_count {
        let name = format!("Parameters_{i}.txt");
        fs::write(dir.join(&name), "(Transform \"EulerTransform\")\n").unwrap();
        names.push(format!("\"{name}\""));
    }
    let json = format!(
        r#"[{{"id": "test", "modality": "generic", "content": "all",
             "parameter_files": [{}]}}]"#,
        names.join(", ")
    );
    fs::write(dir.join("presets.json"), json).unwrap();
}

/// Short-typed volume with the given samples laid out along x.
pub fn short_volume(name: &str, values: &[i16]) -> Volume {
    Volume::new(
        name,
        [values.len(), 1, 1],
        Point3::origin(),
        Vector3::new(1.0, 1.0, 1.0),
        Matrix3::identity(),
        VoxelData::I16(values.to_vec()),
    )
}

/// Float-typed volume with custom origin and spacing, as the resampler
/// would produce.
pub fn float_volume(name: &str, values: &[f32], origin: [f64; 3], spacing: [f64; 3]) -> Volume {
    Volume::new(
        name,
        [values.len(), 1, 1],
        Point3::new(origin[0], origin[1], origin[2]),
        Vector3::new(spacing[0], spacing[1], spacing[2]),
        Matrix3::identity(),
        VoxelData::F32(values.to_vec()),
    )
}

/// Displacement field whose vector components are exactly representable as
/// f32, so file round trips compare equal.
pub fn sample_field(voxels: usize) -> DisplacementField {
    let vectors = (0..voxels)
        .map(|i| Vector3::new(i as f64 * 0.5, -0.25, 1.0))
        .collect();
    DisplacementField {
        dims: [voxels, 1, 1],
        origin: Point3::origin(),
        spacing: Vector3::new(1.0, 1.0, 1.0),
        direction: Matrix3::identity(),
        vectors,
    }
}

/// Write a deformation field file and point the fake transformix at it.
pub fn stage_deformation_field(bin: &FakeBin, field: &DisplacementField) {
    let path = bin.path().join("staged-deformation.mhd");
    metaimage::write_displacement_field(field, &path).unwrap();
    bin.set("FAKE_DEFORMATION_FIELD", &path.display().to_string());
}

/// Write a result volume file and point the fake transformix at it.
pub fn stage_result_volume(bin: &FakeBin, volume: &Volume) {
    let path = bin.path().join("staged-result.mhd");
    metaimage::write_volume(volume, &path).unwrap();
    bin.set("FAKE_RESULT_VOLUME", &path.display().to_string());
}
