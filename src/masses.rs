// src/masses.rs

use crate::error::{PcaError, PcaResult};

/// Normalises an atom label to an element symbol.
///
/// Trailing digits and punctuation are dropped and the case is fixed, so `"CL"`,
/// `"cl"` and `"Cl2"` all map to `"Cl"`, and `"C12"` maps to `"C"`.
pub fn element_symbol(label: &str) -> String {
    let letters: String = label.trim().chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let mut chars = letters.chars();
    match chars.next() {
        Some(first) => {
            let mut symbol = first.to_ascii_uppercase().to_string();
            symbol.extend(chars.take(1).map(|c| c.to_ascii_lowercase()));
            symbol
        }
        None => String::new(),
    }
}

fn lookup(symbol: &str) -> Option<f64> {
    let mass = match symbol {
        "H" => 1.00794,
        "D" => 2.01410,
        "He" => 4.002602,
        "Li" => 6.941,
        "Be" => 9.012182,
        "B" => 10.811,
        "C" => 12.0107,
        "N" => 14.0067,
        "O" => 15.9994,
        "F" => 18.9984032,
        "Ne" => 20.1797,
        "Na" => 22.98976928,
        "Mg" => 24.3050,
        "Al" => 26.9815386,
        "Si" => 28.0855,
        "P" => 30.973762,
        "S" => 32.065,
        "Cl" => 35.453,
        "Ar" => 39.948,
        "K" => 39.0983,
        "Ca" => 40.078,
        "Sc" => 44.955912,
        "Ti" => 47.867,
        "V" => 50.9415,
        "Cr" => 51.9961,
        "Mn" => 54.938045,
        "Fe" => 55.845,
        "Co" => 58.933195,
        "Ni" => 58.6934,
        "Cu" => 63.546,
        "Zn" => 65.38,
        "Ga" => 69.723,
        "Ge" => 72.64,
        "As" => 74.92160,
        "Se" => 78.96,
        "Br" => 79.904,
        "Kr" => 83.798,
        "Rb" => 85.4678,
        "Sr" => 87.62,
        "Zr" => 91.224,
        "Mo" => 95.96,
        "Ru" => 101.07,
        "Rh" => 102.90550,
        "Pd" => 106.42,
        "Ag" => 107.8682,
        "Cd" => 112.411,
        "Sn" => 118.710,
        "Sb" => 121.760,
        "I" => 126.90447,
        "Xe" => 131.293,
        "Cs" => 132.9054519,
        "Ba" => 137.327,
        "W" => 183.84,
        "Os" => 190.23,
        "Ir" => 192.217,
        "Pt" => 195.084,
        "Au" => 196.966569,
        "Hg" => 200.59,
        "Pb" => 207.2,
        "Bi" => 208.98040,
        _ => return None,
    };
    Some(mass)
}

/// Atomic weight (amu) for an atom label.
///
/// Unknown elements are a configuration error: mass-weighting with a guessed mass
/// would silently distort the PCA metric.
pub fn atomic_mass(label: &str) -> PcaResult<f64> {
    let symbol = element_symbol(label);
    lookup(&symbol).ok_or_else(|| {
        PcaError::Configuration(format!("no atomic mass known for atom label '{}'", label))
    })
}

/// Atomic weights for every label, in order.
pub fn atomic_masses(elements: &[String]) -> PcaResult<Vec<f64>> {
    elements.iter().map(|label| atomic_mass(label)).collect()
}
