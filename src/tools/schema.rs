use serde_json::{Value, json};

const CONDITIONS: [&str; 6] = [
    "New",
    "Like New",
    "Very Good",
    "Good",
    "Acceptable",
    "For parts or not working",
];

fn string_array() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

fn shipping_options() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "service": {"type": "string"},
                "cost": {"type": "number", "minimum": 0},
                "estimated_days": {"type": "integer", "minimum": 0},
                "free_shipping": {"type": "boolean"}
            },
            "required": ["service", "cost"],
            "additionalProperties": false
        }
    })
}

fn listing_changes() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string", "maxLength": 80},
            "description": {"type": "string"},
            "price": {"type": "number", "exclusiveMinimum": 0},
            "quantity": {"type": "integer", "minimum": 0},
            "images": string_array(),
            "item_specifics": {"type": "object", "additionalProperties": {"type": "string"}},
            "shipping_options": shipping_options()
        },
        "additionalProperties": false
    })
}

fn listing_id_only() -> Value {
    json!({
        "type": "object",
        "properties": {"listing_id": {"type": "string"}},
        "required": ["listing_id"],
        "additionalProperties": false
    })
}

pub fn create_listing() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string", "maxLength": 80},
            "description": {"type": "string"},
            "price": {"type": "number", "exclusiveMinimum": 0},
            "quantity": {"type": "integer", "minimum": 0, "default": 1},
            "category_id": {"type": "string"},
            "condition": {"type": "string", "enum": CONDITIONS, "default": "New"},
            "images": string_array(),
            "item_specifics": {"type": "object", "additionalProperties": {"type": "string"}},
            "shipping_options": shipping_options()
        },
        "required": ["title", "description", "price", "category_id"],
        "additionalProperties": false
    })
}

pub fn update_listing() -> Value {
    json!({
        "type": "object",
        "properties": {
            "listing_id": {"type": "string"},
            "updates": listing_changes()
        },
        "required": ["listing_id", "updates"],
        "additionalProperties": false
    })
}

pub fn get_listing() -> Value {
    listing_id_only()
}

pub fn delete_listing() -> Value {
    listing_id_only()
}

pub fn analyze_listing() -> Value {
    listing_id_only()
}

pub fn search_listings() -> Value {
    json!({
        "type": "object",
        "properties": {
            "keyword": {"type": "string"},
            "status": {"type": "string", "enum": ["draft", "active", "sold", "ended"]},
            "category": {"type": "string"},
            "date_from": {"type": "string", "format": "date-time"},
            "date_to": {"type": "string", "format": "date-time"}
        },
        "additionalProperties": false
    })
}

pub fn optimize_listing() -> Value {
    json!({
        "type": "object",
        "properties": {
            "listing_id": {"type": "string"},
            "apply": {"type": "boolean", "default": false}
        },
        "required": ["listing_id"],
        "additionalProperties": false
    })
}

pub fn bulk_operations() -> Value {
    json!({
        "type": "object",
        "properties": {
            "operation": {"type": "string", "enum": ["update", "delete", "relist"]},
            "listing_ids": string_array(),
            "data": listing_changes()
        },
        "required": ["operation", "listing_ids"],
        "additionalProperties": false
    })
}

pub fn suggest_categories() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "description": {"type": "string"}
        },
        "required": ["title"],
        "additionalProperties": false
    })
}

pub fn generate_report() -> Value {
    json!({
        "type": "object",
        "properties": {
            "report_type": {
                "type": "string",
                "enum": ["sales", "performance", "inventory", "analytics"]
            },
            "date_range": {
                "type": "object",
                "properties": {
                    "start": {"type": "string", "format": "date"},
                    "end": {"type": "string", "format": "date"}
                },
                "required": ["start", "end"]
            },
            "filters": {
                "type": "object",
                "properties": {
                    "category_id": {"type": "string"},
                    "status": {"type": "string", "enum": ["draft", "active", "sold", "ended"]}
                }
            }
        },
        "required": ["report_type"],
        "additionalProperties": false
    })
}

pub fn ai_assistant() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "context": {"type": "object"}
        },
        "required": ["query"],
        "additionalProperties": false
    })
}
