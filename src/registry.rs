use serde::{Deserialize, Serialize};

/// A plant as the assistant consumes it. The backend speaks Spanish field
/// names; aliases keep both the old (`idPlanta`) and new (`id`) id keys
/// working.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Plant {
    #[serde(alias = "idPlanta")]
    pub id: i64,
    #[serde(alias = "nombrePersonalizado", default)]
    pub display_name: String,
    #[serde(alias = "especie", default)]
    pub species: Option<String>,
    #[serde(alias = "estado", default)]
    pub state: Option<String>,
}

impl Plant {
    pub fn state_label(&self) -> &str {
        self.state.as_deref().unwrap_or("normal")
    }
}

/// The user's plants for the duration of one chat session.
///
/// Filled once when the session starts; read-only afterwards. A failed
/// load leaves it empty and the conversation runs in "no plants known"
/// mode rather than aborting.
#[derive(Debug, Default)]
pub struct PlantRegistry {
    plants: Vec<Plant>,
}

impl PlantRegistry {
    pub fn new() -> Self {
        Self { plants: Vec::new() }
    }

    pub fn from_plants(plants: Vec<Plant>) -> Self {
        Self { plants }
    }

    pub fn fill(&mut self, plants: Vec<Plant>) {
        self.plants = plants;
    }

    pub fn plants(&self) -> &[Plant] {
        &self.plants
    }

    pub fn len(&self) -> usize {
        self.plants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plants.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Plant> {
        self.plants.get(index)
    }

    pub fn by_id(&self, id: i64) -> Option<&Plant> {
        self.plants.iter().find(|p| p.id == id)
    }
}

/// Lowercase, trim, and drop everything that is not a letter or a space.
/// Accented Spanish letters survive since the check is alphabetic, not ASCII.
pub fn normalize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Match a candidate name against the registry. First hit wins:
/// exact display name, then partial containment either direction,
/// then species containment. Pure; no side effects.
pub fn resolve<'a>(candidate: &str, plants: &'a [Plant]) -> Option<&'a Plant> {
    let needle = normalize(candidate);
    // Guard against one-letter fragments matching half the registry
    if needle.chars().filter(|c| c.is_alphabetic()).count() < 2 {
        return None;
    }

    if let Some(exact) = plants
        .iter()
        .find(|p| normalize(&p.display_name) == needle)
    {
        return Some(exact);
    }

    if let Some(partial) = plants.iter().find(|p| {
        let name = normalize(&p.display_name);
        !name.is_empty() && (name.contains(&needle) || needle.contains(&name))
    }) {
        return Some(partial);
    }

    plants.iter().find(|p| {
        p.species
            .as_deref()
            .map(|s| normalize(s).contains(&needle))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(id: i64, name: &str, species: Option<&str>) -> Plant {
        Plant {
            id,
            display_name: name.to_string(),
            species: species.map(|s| s.to_string()),
            state: None,
        }
    }

    #[test]
    fn deserializes_backend_field_names() {
        let json = r#"{
            "idPlanta": 3,
            "nombrePersonalizado": "Lavanda del Jardín",
            "especie": "Lavandula",
            "estado": "saludable"
        }"#;
        let p: Plant = serde_json::from_str(json).unwrap();
        assert_eq!(p.id, 3);
        assert_eq!(p.display_name, "Lavanda del Jardín");
        assert_eq!(p.species.as_deref(), Some("Lavandula"));
        assert_eq!(p.state_label(), "saludable");
    }

    #[test]
    fn deserializes_plain_id_too() {
        let p: Plant = serde_json::from_str(r#"{"id": 9, "nombrePersonalizado": "Rosa"}"#).unwrap();
        assert_eq!(p.id, 9);
        assert_eq!(p.state_label(), "normal");
    }

    #[test]
    fn exact_match_wins() {
        let plants = vec![plant(1, "Lavanda", None), plant(2, "Lavanda grande", None)];
        let hit = resolve("lavanda", &plants).unwrap();
        assert_eq!(hit.id, 1);
    }

    #[test]
    fn exact_beats_species() {
        // A different plant whose species contains the candidate must lose
        let plants = vec![
            plant(1, "Rincón verde", Some("cactus de navidad")),
            plant(2, "Cactus", None),
        ];
        let hit = resolve("cactus", &plants).unwrap();
        assert_eq!(hit.id, 2);
    }

    #[test]
    fn partial_containment_both_directions() {
        let plants = vec![plant(1, "Tomate Cherry", None)];
        assert_eq!(resolve("tomate", &plants).unwrap().id, 1);
        assert_eq!(resolve("mi tomate cherry favorito", &plants).unwrap().id, 1);
    }

    #[test]
    fn falls_back_to_species() {
        let plants = vec![plant(1, "Cactus", Some("Cactaceae"))];
        let hit = resolve("cactaceae", &plants).unwrap();
        assert_eq!(hit.id, 1);
    }

    #[test]
    fn no_match_is_none() {
        let plants = vec![plant(1, "Rosa", None), plant(2, "Romero", None)];
        assert!(resolve("helecho", &plants).is_none());
    }

    #[test]
    fn short_fragments_never_match() {
        let plants = vec![plant(1, "Rosa", None)];
        assert!(resolve("r", &plants).is_none());
        assert!(resolve("  ", &plants).is_none());
    }

    #[test]
    fn resolver_is_pure() {
        let plants = vec![plant(1, "Rosa", None)];
        let a = resolve("rosa", &plants).map(|p| p.id);
        let b = resolve("rosa", &plants).map(|p| p.id);
        assert_eq!(a, b);
    }

    #[test]
    fn first_match_on_duplicate_names() {
        let plants = vec![plant(1, "Rosa", None), plant(2, "Rosa", None)];
        assert_eq!(resolve("rosa", &plants).unwrap().id, 1);
    }
}
