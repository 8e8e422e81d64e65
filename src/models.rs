//! Modelos de dominio: alimentos del fichero semilla, resultados de la
//! búsqueda vectorial y consumo de tokens del proveedor LLM.

use serde::{Deserialize, Serialize};

/// Registro estático del fichero semilla `foods.json`.
/// Inmutable; se consume una única vez durante la población del índice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodItem {
    pub id: String,
    pub text: String,
    pub region: String,
    #[serde(rename = "type")]
    pub food_type: String,
}

/// Metadatos asociados a cada vector en el índice.
/// En la población se rellenan todos los campos; en las búsquedas se
/// deserializa lo que el servicio devuelva.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMetadata {
    #[serde(default)]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub food_type: Option<String>,
}

/// Resultado puntuado devuelto por la búsqueda vectorial, en el orden de
/// relevancia que decide el servicio. Efímero: vive lo que dura la petición.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: SearchMetadata,
}

/// Vector que se sube al índice durante la población. `data` es el texto
/// crudo; el servicio calcula el embedding en el servidor.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub data: String,
    pub metadata: SearchMetadata,
}

/// Consumo de tokens reportado por el proveedor LLM. Se reenvía tal cual
/// al cliente dentro de la respuesta RAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Subconjunto de la respuesta `/info` del índice, usado por el health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    #[serde(rename = "vectorCount", default)]
    pub vector_count: u64,
    #[serde(rename = "pendingVectorCount", default)]
    pub pending_vector_count: u64,
    #[serde(default)]
    pub dimension: u64,
    #[serde(rename = "similarityFunction", default)]
    pub similarity_function: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn food_item_deserializes_type_field() {
        let json = r#"{"id": "7", "text": "Pasta is a staple of Italian cuisine.", "region": "Italy", "type": "main course"}"#;
        let food: FoodItem = serde_json::from_str(json).unwrap();
        assert_eq!(food.id, "7");
        assert_eq!(food.food_type, "main course");
        assert_eq!(food.region, "Italy");
    }

    #[test]
    fn metadata_omits_missing_optionals() {
        let metadata = SearchMetadata {
            text: "some text".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["text"], "some text");
        assert!(json.get("name").is_none());
        assert!(json.get("cuisine").is_none());
    }

    #[test]
    fn usage_parses_provider_field_names() {
        let json = r#"{"prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.total_tokens, 200);
    }

    #[test]
    fn index_info_tolerates_extra_fields() {
        let json = r#"{"vectorCount": 42, "pendingVectorCount": 0, "indexSize": 12345, "dimension": 1024, "similarityFunction": "COSINE"}"#;
        let info: IndexInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.vector_count, 42);
        assert_eq!(info.similarity_function, "COSINE");
    }
}
