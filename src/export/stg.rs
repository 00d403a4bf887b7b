//! STG placement line and the dual-format XML model selector.

use std::path::Path;

use crate::convert::transform::TileOrigin;
use crate::export::ExportError;

/// FlightGear version gate for the glTF loader in the XML selector.
const GLTF_CAPABLE_VERSION: &str = "2024.2.0";

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Artifact the STG line should reference for a format combination.
pub fn artifact_filename(tile: u32, emit_gltf: bool, emit_ac3d: bool) -> String {
    match (emit_gltf, emit_ac3d) {
        (true, true) => format!("{tile}.xml"),
        (true, false) => format!("{tile}.gltf"),
        _ => format!("{tile}.ac"),
    }
}

/// STG orientation angles `(heading, pitch, roll)` per format combination.
///
/// The composite models are built in the glTF frame; these constants spin
/// each artifact kind into FlightGear's scenery frame.
pub fn stg_angles(emit_gltf: bool, emit_ac3d: bool) -> (f64, f64, f64) {
    match (emit_gltf, emit_ac3d) {
        (true, true) => (0.0, 0.0, 90.0),
        (true, false) => (270.0, 0.0, 90.0),
        _ => (90.0, 0.0, 0.0),
    }
}

/// Minimal invariant formatting: integral values print without a decimal
/// point, everything else with just the digits it needs.
fn fmt_num(v: f64) -> String {
    format!("{v}")
}

/// The one-line STG body.
pub fn stg_line(filename: &str, origin: &TileOrigin, angles: (f64, f64, f64)) -> String {
    format!(
        "OBJECT_STATIC {} {} {} {} {} {} {}\n",
        filename,
        fmt_num(origin.longitude),
        fmt_num(origin.latitude),
        fmt_num(origin.altitude),
        fmt_num(angles.0),
        fmt_num(angles.1),
        fmt_num(angles.2),
    )
}

pub fn write_stg(
    path: &Path,
    filename: &str,
    origin: &TileOrigin,
    angles: (f64, f64, f64),
) -> Result<(), ExportError> {
    std::fs::write(path, stg_line(filename, origin, angles)).map_err(io_err(path))
}

/// PropertyList selector emitted when both formats are produced.
///
/// The glTF model is gated on the first FlightGear release with a glTF
/// loader; older versions fall back to the AC3D model. Each model also
/// gets the static rotations that align its native axes.
pub fn xml_selector(tile: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<PropertyList>
  <model>
    <name>ac</name>
    <path>{tile}.ac</path>
  </model>
  <model>
    <name>gltf</name>
    <path>{tile}.gltf</path>
  </model>
  <animation>
    <type>rotate</type>
    <object-name>ac</object-name>
    <offset-deg>90</offset-deg>
    <axis>
      <z>1</z>
    </axis>
  </animation>
  <animation>
    <type>rotate</type>
    <object-name>gltf</object-name>
    <offset-deg>270</offset-deg>
    <axis>
      <z>1</z>
    </axis>
  </animation>
  <animation>
    <type>rotate</type>
    <object-name>gltf</object-name>
    <offset-deg>90</offset-deg>
    <axis>
      <x>1</x>
    </axis>
  </animation>
  <animation>
    <type>select</type>
    <object-name>gltf</object-name>
    <condition>
      <equals>
        <property>/sim/version/flightgear</property>
        <value>{version}</value>
      </equals>
    </condition>
  </animation>
  <animation>
    <type>select</type>
    <object-name>ac</object-name>
    <condition>
      <not>
        <equals>
          <property>/sim/version/flightgear</property>
          <value>{version}</value>
        </equals>
      </not>
    </condition>
  </animation>
</PropertyList>
"#,
        tile = tile,
        version = GLTF_CAPABLE_VERSION,
    )
}

pub fn write_xml_selector(path: &Path, tile: u32) -> Result<(), ExportError> {
    std::fs::write(path, xml_selector(tile)).map_err(io_err(path))
}
