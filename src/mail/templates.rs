use chrono::{DateTime, Utc};

use crate::models::journey::Journey;
use crate::models::staff::{Operator, Staff};
use crate::models::vehicle::Vehicle;

pub struct Message {
    pub subject: String,
    pub html: String,
}

/// Everything a notification about one lead assignment can mention.
pub struct AssignmentContext<'a> {
    pub journey: &'a Journey,
    pub vehicle: &'a Vehicle,
    pub staff: &'a Staff,
    pub operator: &'a Operator,
}

pub fn captain_assigned(ctx: &AssignmentContext<'_>) -> Message {
    let departs = format_departure(ctx.journey.departs_at);
    Message {
        subject: format!("You are lead on {} departing {departs}", ctx.vehicle.name),
        html: format!(
            "<p>Hello {name},</p>\
             <p>{operator} has assigned you as lead for <strong>{vehicle}</strong> \
             on the journey departing <strong>{departs}</strong>.</p>\
             <p>Please confirm the assignment so the crew roster can be finalised.</p>\
             <p>Reference: {journey}</p>",
            name = escape(&ctx.staff.name),
            operator = escape(&ctx.operator.name),
            vehicle = escape(&ctx.vehicle.name),
            journey = ctx.journey.id,
        ),
    }
}

pub fn operator_assigned(ctx: &AssignmentContext<'_>) -> Message {
    let departs = format_departure(ctx.journey.departs_at);
    Message {
        subject: format!("{} assigned as lead on {}", ctx.staff.name, ctx.vehicle.name),
        html: format!(
            "<p>{staff} ({role}) is now the lead for <strong>{vehicle}</strong> \
             on the journey departing <strong>{departs}</strong>.</p>\
             <p>The assignment stays provisional until {staff} confirms it.</p>\
             <p>Reference: {journey}</p>",
            staff = escape(&ctx.staff.name),
            role = escape(&ctx.staff.role),
            vehicle = escape(&ctx.vehicle.name),
            journey = ctx.journey.id,
        ),
    }
}

pub fn operator_released(ctx: &AssignmentContext<'_>) -> Message {
    let departs = format_departure(ctx.journey.departs_at);
    Message {
        subject: format!("Lead hold released on {}", ctx.vehicle.name),
        html: format!(
            "<p>The unconfirmed lead hold of {staff} on <strong>{vehicle}</strong> \
             for the journey departing <strong>{departs}</strong> was released \
             because no seats have been booked yet.</p>\
             <p>Reference: {journey}</p>",
            staff = escape(&ctx.staff.name),
            vehicle = escape(&ctx.vehicle.name),
            journey = ctx.journey.id,
        ),
    }
}

fn format_departure(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
