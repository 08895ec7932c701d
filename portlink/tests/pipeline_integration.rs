//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Integration tests chaining pipeline stages.

use portlink::{
    AtomicBuffer, Contact, Endpoint, EndpointConfig, Message, PipelineStage, SendPolicy,
};
use std::thread;
use std::time::Duration;

#[test]
fn test_two_stage_chain_preserves_order() {
    let source = AtomicBuffer::new();
    let middle = AtomicBuffer::new();
    let sink = AtomicBuffer::new();

    let add = PipelineStage::spawn("add", source.clone(), middle.clone(), |x: i32| x + 2).unwrap();
    let halve =
        PipelineStage::spawn("halve", middle.clone(), sink.clone(), |x: i32| f64::from(x) / 2.0)
            .unwrap();

    let collector = {
        let sink = sink.clone();
        thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(value) = sink.read() {
                seen.push(value);
            }
            seen
        })
    };

    for x in 0..5 {
        source.write(x).unwrap();
    }
    source.close();

    assert_eq!(collector.join().unwrap(), vec![1.0, 1.5, 2.0, 2.5, 3.0]);
    assert!(middle.is_closed());
    assert!(sink.is_closed());
    // End of stream travelled down the chain after the last value.
    assert_eq!(add.processed_count(), 5);
    assert_eq!(halve.processed_count(), 5);
}

#[test]
fn test_closing_a_stage_leaves_downstream_open() {
    let source: AtomicBuffer<u32> = AtomicBuffer::new();
    let sink = AtomicBuffer::new();
    let stage = PipelineStage::spawn("pass", source.clone(), sink.clone(), |x: u32| x).unwrap();

    source.write(7).unwrap();
    assert_eq!(sink.read_timeout(Duration::from_secs(1)), Some(7));
    stage.close();

    assert!(!sink.is_closed());
    assert!(source.write(8).is_ok());
}

#[test]
fn test_stage_feeding_an_endpoint() {
    let reader = Endpoint::new(EndpointConfig::default()).unwrap();
    let contact = reader.listen(&Contact::by_name("/sink")).unwrap();
    let received = AtomicBuffer::new();
    {
        let received = received.clone();
        reader.set_read_callback(move |m: &Message| {
            let _ = received.write(m.as_text().unwrap_or_default());
        });
    }

    let writer = Endpoint::new(EndpointConfig::default()).unwrap();
    writer.connect(&contact).unwrap();

    let words = AtomicBuffer::new();
    let shouted = AtomicBuffer::new();
    let stage = PipelineStage::spawn("shout", words.clone(), shouted.clone(), |w: String| {
        w.to_uppercase()
    })
    .unwrap();

    for word in ["quiet", "please"] {
        words.write(word.to_string()).unwrap();
        let loud = shouted.read().unwrap();
        writer.send(Message::text(loud), SendPolicy::Block).unwrap();
        let echoed = received.read_timeout(Duration::from_secs(5));
        assert_eq!(echoed.as_deref(), Some(word.to_uppercase().as_str()));
    }

    stage.close();
    writer.close();
    reader.close();
}
