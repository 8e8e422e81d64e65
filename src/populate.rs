//! Población one-shot del índice vectorial a partir del fichero semilla
//! `foods.json` (id, texto, región y tipo por alimento).
//!
//! Por cada alimento se derivan metadatos: un nombre heurístico extraído de
//! la primera frase, la etiqueta de cocina mapeada desde la región y la
//! categoría tomada del tipo. El servicio embebe el texto en el servidor.

use std::{fs, path::Path};

use anyhow::{anyhow, Result};
use tracing::{error, info};

use crate::models::{FoodItem, SearchMetadata, VectorRecord};
use crate::vector_store::VectorStore;

/// Tamaño máximo de lote aceptado por el servicio en un upsert.
pub const BATCH_SIZE: usize = 100;

/// Resumen de los resultados de una operación de población.
#[derive(Debug, Default)]
pub struct PopulationSummary {
    pub total_items: usize,
    pub uploaded: usize,
}

impl std::fmt::Display for PopulationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Successfully uploaded {} food items to vector database",
            self.uploaded
        )
    }
}

/// Lee y deserializa el fichero semilla.
pub fn load_seed_file(path: &Path) -> Result<Vec<FoodItem>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("No se pudo leer {}: {e}", path.display()))?;
    let foods: Vec<FoodItem> = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("JSON inválido en {}: {e}", path.display()))?;
    Ok(foods)
}

/// Convierte un alimento en el vector a subir, con sus metadatos derivados.
pub fn to_vector_record(food: &FoodItem) -> VectorRecord {
    VectorRecord {
        id: format!("food_{}", food.id),
        data: food.text.clone(),
        metadata: SearchMetadata {
            text: food.text.clone(),
            name: Some(extract_food_name(&food.text)),
            cuisine: Some(map_region_to_cuisine(&food.region).to_string()),
            category: Some(food.food_type.clone()),
            description: Some(food.text.clone()),
            region: Some(food.region.clone()),
            food_type: Some(food.food_type.clone()),
        },
    }
}

/// Sube todos los alimentos al índice en lotes de `BATCH_SIZE`.
/// Se detiene en el primer lote fallido.
pub async fn populate_index(
    store: &VectorStore,
    foods: &[FoodItem],
) -> Result<PopulationSummary> {
    let records: Vec<VectorRecord> = foods.iter().map(to_vector_record).collect();
    info!("Poblando el índice con {} alimentos...", records.len());

    let mut summary = PopulationSummary {
        total_items: foods.len(),
        uploaded: 0,
    };

    for batch in records.chunks(BATCH_SIZE) {
        if let Err(e) = store.upsert(batch).await {
            error!(
                "Fallo subiendo un lote tras {} elementos: {e}",
                summary.uploaded
            );
            return Err(e);
        }
        summary.uploaded += batch.len();
        info!(
            "Lote subido: {}/{} alimentos",
            summary.uploaded, summary.total_items
        );
    }

    Ok(summary)
}

/// Heurística de nombre: las palabras de la primera frase anteriores a "is";
/// si no aparece, las tres primeras palabras.
pub fn extract_food_name(text: &str) -> String {
    let first_sentence = text.split('.').next().unwrap_or("").trim();
    let words: Vec<&str> = first_sentence.split_whitespace().collect();

    if let Some(pos) = words.iter().position(|w| w.eq_ignore_ascii_case("is")) {
        if pos > 0 {
            return words[..pos].join(" ");
        }
    }

    words.iter().take(3).copied().collect::<Vec<_>>().join(" ")
}

/// Mapa estático de región a etiqueta de cocina. Las regiones desconocidas
/// se devuelven tal cual.
pub fn map_region_to_cuisine(region: &str) -> &str {
    match region {
        "India" | "North India" | "South India" | "Punjab" | "Bengal" | "Gujarat" | "Delhi"
        | "Mumbai" | "Hyderabad" => "Indian",
        "China" | "Shanghai" | "Sichuan, China" | "Cantonese, China" => "Chinese",
        "Japan" => "Japanese",
        "Korea" => "Korean",
        "Thailand" => "Thai",
        "Vietnam" => "Vietnamese",
        "Indonesia" => "Indonesian",
        "Malaysia" => "Malaysian",
        "Philippines" => "Filipino",
        "Taiwan" => "Taiwanese",
        "Hong Kong" => "Cantonese",
        "Italy" | "Northern Italy" | "Rome, Italy" | "Naples, Italy" | "Veneto, Italy" => {
            "Italian"
        }
        "France" | "Burgundy, France" | "Marseille, France" => "French",
        "Spain" | "Andalusia, Spain" => "Spanish",
        "Mexico" => "Mexican",
        "Spain/Mexico" => "Spanish/Mexican",
        "Greece" => "Greek",
        "Turkey" => "Turkish",
        "Middle East" => "Middle Eastern",
        "Morocco" => "Moroccan",
        "North Africa" => "North African",
        "West Africa" => "West African",
        "West/Central Africa" => "African",
        "Ethiopia" => "Ethiopian",
        "South Africa" => "South African",
        "United States" => "American",
        "Southern United States" => "Southern American",
        "New England, USA" => "American",
        "Hawaii, USA" => "Hawaiian",
        "Canada" | "Quebec, Canada" => "Canadian",
        "Brazil" => "Brazilian",
        "Argentina" => "Argentinian",
        "Peru" => "Peruvian",
        "United Kingdom" => "British",
        "Scotland" => "Scottish",
        "Yorkshire, England" => "British",
        "Germany" | "Black Forest, Germany" | "Rhineland, Germany" => "German",
        "Hungary" => "Hungarian",
        "Poland" => "Polish",
        "Ukraine" => "Ukrainian",
        "Russia" => "Russian",
        "Mongolia" => "Mongolian",
        "Nepal" => "Nepalese",
        "Bangladesh" => "Bangladeshi",
        "Pakistan" => "Pakistani",
        "Australia" => "Australian",
        "New Zealand" => "New Zealand",
        "Samoa, South Pacific" => "Polynesian",
        "Fiji, South Pacific" => "Fijian",
        "Finland" => "Finnish",
        "Scandinavia" => "Scandinavian",
        "Norway" => "Norwegian",
        "Sweden" => "Swedish",
        "Denmark" => "Danish",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn food(id: &str, text: &str, region: &str, food_type: &str) -> FoodItem {
        FoodItem {
            id: id.to_string(),
            text: text.to_string(),
            region: region.to_string(),
            food_type: food_type.to_string(),
        }
    }

    #[test]
    fn extracts_name_before_is() {
        assert_eq!(
            extract_food_name("Pasta is a staple food of Italian cuisine."),
            "Pasta"
        );
        assert_eq!(
            extract_food_name("Dal makhani is a buttery lentil curry from Punjab."),
            "Dal makhani"
        );
        assert_eq!(
            extract_food_name("Biryani IS a fragrant layered rice dish."),
            "Biryani"
        );
    }

    #[test]
    fn falls_back_to_first_three_words() {
        assert_eq!(
            extract_food_name("Slow-cooked beans with rice. A classic."),
            "Slow-cooked beans with"
        );
        assert_eq!(extract_food_name(""), "");
    }

    #[test]
    fn maps_known_regions_to_cuisines() {
        assert_eq!(map_region_to_cuisine("Italy"), "Italian");
        assert_eq!(map_region_to_cuisine("Gujarat"), "Indian");
        assert_eq!(map_region_to_cuisine("Nepal"), "Nepalese");
        assert_eq!(map_region_to_cuisine("Sichuan, China"), "Chinese");
    }

    #[test]
    fn unknown_region_passes_through() {
        assert_eq!(map_region_to_cuisine("Atlantis"), "Atlantis");
    }

    #[test]
    fn vector_record_derives_metadata() {
        let item = food(
            "12",
            "Dhokla is a savory steamed snack from Gujarat.",
            "Gujarat",
            "snack",
        );

        let record = to_vector_record(&item);
        assert_eq!(record.id, "food_12");
        assert_eq!(record.data, item.text);
        assert_eq!(record.metadata.name.as_deref(), Some("Dhokla"));
        assert_eq!(record.metadata.cuisine.as_deref(), Some("Indian"));
        assert_eq!(record.metadata.category.as_deref(), Some("snack"));
        assert_eq!(record.metadata.region.as_deref(), Some("Gujarat"));
    }

    #[test]
    fn batches_are_ceil_of_items_over_batch_size() {
        let foods: Vec<FoodItem> = (0..250)
            .map(|i| food(&i.to_string(), "Test food is a test.", "Italy", "test"))
            .collect();
        let records: Vec<VectorRecord> = foods.iter().map(to_vector_record).collect();

        // 250 elementos con lotes de 100 => 3 upserts.
        assert_eq!(records.chunks(BATCH_SIZE).count(), 3);
        let uploaded: usize = records.chunks(BATCH_SIZE).map(|b| b.len()).sum();
        assert_eq!(uploaded, 250);
    }

    #[test]
    fn seed_file_parses_food_items() {
        let json = r#"[
            {"id": "1", "text": "Pasta is a staple of Italian cuisine.", "region": "Italy", "type": "main course"},
            {"id": "2", "text": "Lassi is a cold yogurt drink from Punjab.", "region": "Punjab", "type": "drink"}
        ]"#;
        let foods: Vec<FoodItem> = serde_json::from_str(json).unwrap();
        assert_eq!(foods.len(), 2);
        assert_eq!(foods[1].food_type, "drink");
    }
}
